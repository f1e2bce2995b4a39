use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use feed_verifier::{
    FeedSource, MemoryCache, PgVerificationStore, RuleSet, SystemClock, VerificationPipeline,
    VerificationStore, VerifierConfig,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "feed-verifier",
    about = "Verify syndicated news feeds before publication"
)]
struct Args {
    /// Feed URL to verify; repeat for several. Defaults to the built-in list.
    #[arg(long = "feed")]
    feeds: Vec<String>,

    /// JSON rule table overriding the built-in heuristics.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Postgres connection string; falls back to DATABASE_URL. Verification
    /// runs without one, just without the audit trail.
    #[arg(long)]
    database_url: Option<String>,

    /// Cap on the accepted article list.
    #[arg(long, default_value_t = 10)]
    max_articles: usize,

    /// Skip the per-article source URL reachability stage.
    #[arg(long)]
    no_verify_urls: bool,

    /// Print the accepted articles as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// After the run, print verification stats for the last N days.
    #[arg(long)]
    stats_days: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("Starting feed verifier");

    let rules = match &args.rules {
        Some(path) => RuleSet::from_json_file(path)?,
        None => RuleSet::default(),
    };

    let mut config = VerifierConfig::default();
    if !args.feeds.is_empty() {
        config.feeds = args.feeds.iter().map(FeedSource::new).collect();
    }
    config.max_articles = args.max_articles;
    config.verify_source_urls = !args.no_verify_urls;

    let clock = Arc::new(SystemClock);
    let cache = Arc::new(MemoryCache::new(clock.clone()));

    let mut pipeline = VerificationPipeline::new(config, rules, cache, clock);

    let database_url = args
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());
    let store = match &database_url {
        Some(url) => {
            info!("Connecting to database: {}", redact_password(url));
            let store = PgVerificationStore::connect(url).await?;
            store.setup_schema().await?;
            Some(Arc::new(store))
        }
        None => {
            warn!("No database configured, verification records will not be persisted");
            None
        }
    };
    if let Some(store) = store.clone() {
        pipeline = pipeline.with_store(store);
    }

    let report = pipeline.run().await?;

    if report.from_cache {
        info!("Served {} articles from cache", report.articles.len());
    } else {
        info!(
            "Run complete: {} accepted, {} flagged, {} skipped ({} feeds fetched, {} failed)",
            report.accepted, report.flagged, report.skipped, report.feeds_fetched, report.feeds_failed
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.articles)?);
    } else {
        for article in &report.articles {
            info!(
                "[{}] {} ({}, {})",
                article.verification_status,
                article.title,
                article.source_domain,
                article.published_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    if let Some(days) = args.stats_days {
        match &store {
            Some(store) => match store.stats(days).await {
                Ok(stats) => {
                    info!("Verification stats over the last {} days:", days);
                    info!("  total records: {}", stats.total_records);
                    for (status, count) in &stats.by_status {
                        info!("  {}: {}", status, count);
                    }
                    info!("  retractions detected: {}", stats.retractions_detected);
                    info!(
                        "  avg retraction confidence: {:.2}",
                        stats.avg_retraction_confidence
                    );
                    for flagged in &stats.flagged_domains {
                        info!(
                            "  flagged domain: {} ({} issues)",
                            flagged.domain, flagged.issue_count
                        );
                    }
                }
                Err(e) => error!("Failed to load stats: {}", e),
            },
            None => warn!("Stats requested but no database configured"),
        }
    }

    info!("Feed verifier finished");
    Ok(())
}

fn redact_password(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => database_url.to_string(),
    }
}
