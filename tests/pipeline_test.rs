use std::sync::Arc;

use feed_verifier::rules::WhitelistEntry;
use feed_verifier::{
    Cache, Clock, FeedSource, FetchConfig, MemoryCache, MemoryVerificationStore, Result, RuleSet,
    SystemClock, UrlVerifier, VerificationPipeline, VerificationStatus, VerifierConfig,
    VerifierError,
};
use tracing::info;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// The mock server lives on 127.0.0.1, which the default rules score as an
/// unknown domain. Whitelisting it keeps the credibility stage out of the
/// way of tests that target other stages.
fn local_rules() -> RuleSet {
    let mut rules = RuleSet::default();
    rules.credibility.whitelist.push(WhitelistEntry {
        domain: "127.0.0.1".to_string(),
        score: 95.0,
    });
    rules
}

fn test_config(feed_urls: &[String]) -> VerifierConfig {
    VerifierConfig {
        feeds: feed_urls.iter().map(FeedSource::new).collect(),
        fetch: FetchConfig {
            retry_base_delay_ms: 10,
            ..FetchConfig::default()
        },
        ..VerifierConfig::default()
    }
}

const ARTICLE_BODY: &str = r#"<html><body>
<article><h1>Headline</h1><p>By the author, published today.</p></article>
</body></html>"#;

const GOOD_DESCRIPTION: &str = "Investors weighed the latest rate decision on Tuesday as equity markets posted broad gains across technology, energy and financial shares through a volatile session.";

fn mixed_feed(base: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Local Newsroom</title>
    <link>{base}</link>
    <description>Test feed</description>
    <item>
      <title>Global Markets rally after the Federal Reserve holds rates steady</title>
      <link>{base}/stories/good</link>
      <description>{desc}</description>
      <pubDate>Tue, 05 Mar 2024 12:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Treasury Yields dip as the new inflation reading cools</title>
      <link>{base}/stories/paywalled</link>
      <description>{desc}</description>
      <pubDate>Tue, 05 Mar 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Click here for a miracle cure doctors hate</title>
      <link>{base}/stories/spam</link>
      <description>{desc}</description>
      <pubDate>Tue, 05 Mar 2024 11:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Correction: Banking story withdrawn after review</title>
      <link>{base}/stories/retracted</link>
      <description>This article has been retracted due to factual errors. The newsroom regrets publishing the earlier version and has withdrawn the piece in full.</description>
      <pubDate>Tue, 05 Mar 2024 09:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#,
        base = base,
        desc = GOOD_DESCRIPTION,
    )
}

#[tokio::test]
async fn test_pipeline_end_to_end_decisions() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/news.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(mixed_feed(&base), "application/rss+xml"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/good"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE_BODY, "text/html"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/paywalled"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    // The spam and retracted items are disqualified by the analyzers and
    // must never reach the URL stage; no mocks are mounted for them.

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let store = Arc::new(MemoryVerificationStore::new(clock.clone()));
    let pipeline = VerificationPipeline::new(
        test_config(&[format!("{}/news.xml", base)]),
        local_rules(),
        cache,
        clock,
    )
    .with_store(store.clone());

    let report = pipeline.run().await?;
    info!(
        "Run {}: {} accepted, {} flagged, {} skipped",
        report.run_id, report.accepted, report.flagged, report.skipped
    );

    assert!(!report.from_cache);
    assert_eq!(report.feeds_fetched, 1);
    assert_eq!(report.items_seen, 4);
    assert_eq!(report.accepted, 1, "only the clean article should be accepted");
    assert_eq!(report.flagged, 1, "the paywalled article should be flagged");
    assert_eq!(report.skipped, 2, "spam and retraction should be skipped");

    assert_eq!(report.articles.len(), 2);
    assert_eq!(
        report.articles[0].verification_status,
        VerificationStatus::Verified,
        "the newest surviving article is the accepted one"
    );
    assert!(report.articles[0].link.ends_with("/stories/good"));
    assert_eq!(
        report.articles[1].verification_status,
        VerificationStatus::Warning
    );
    assert!(
        report.articles[0].published_at > report.articles[1].published_at,
        "the list must be sorted by publish date descending"
    );

    // Every item gets an audit row, including the ones that never ship.
    let records = store.records().await;
    assert_eq!(records.len(), 4);

    let retracted = records
        .iter()
        .find(|r| r.original_url.ends_with("/stories/retracted"))
        .expect("the retracted item must be recorded");
    assert_eq!(retracted.status, VerificationStatus::Retracted);
    assert!(retracted.retraction_detected);
    assert!(retracted.retraction_confidence > 0.4);

    let spam = records
        .iter()
        .find(|r| r.original_url.ends_with("/stories/spam"))
        .expect("the spam item must be recorded");
    assert_eq!(spam.status, VerificationStatus::Error);
    assert!(!spam.source_legitimate);
    assert_eq!(
        spam.content_accessible, None,
        "disqualified items skip the URL stage"
    );

    let good = records
        .iter()
        .find(|r| r.original_url.ends_with("/stories/good"))
        .expect("the accepted item must be recorded");
    assert_eq!(good.status, VerificationStatus::Verified);
    assert_eq!(good.content_accessible, Some(true));

    let source = store
        .source("127.0.0.1")
        .await
        .expect("the source domain should be upserted");
    assert_eq!(source.score, 95.0);
    assert_eq!(
        store.source_name("127.0.0.1").await.as_deref(),
        Some("Local Newsroom")
    );
    Ok(())
}

#[tokio::test]
async fn test_pipeline_isolates_failing_feeds() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/huge.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64 * 1024)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(mixed_feed(&base), "application/rss+xml"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/good"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE_BODY, "text/html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/paywalled"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut config = test_config(&[
        format!("{}/broken.xml", base),
        format!("{}/huge.xml", base),
        format!("{}/news.xml", base),
    ]);
    config.fetch.max_feed_bytes = 32 * 1024;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let pipeline = VerificationPipeline::new(config, local_rules(), cache, clock);

    let report = pipeline.run().await?;
    assert_eq!(report.feeds_fetched, 1, "only the healthy feed should parse");
    assert_eq!(report.feeds_failed, 2);
    assert!(
        !report.articles.is_empty(),
        "articles from the healthy feed must still come through"
    );
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_run_serves_cached_articles() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    let base = server.uri();

    // One run's worth of traffic and not a request more.
    Mock::given(method("GET"))
        .and(path("/news.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(mixed_feed(&base), "application/rss+xml"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/good"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE_BODY, "text/html"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/paywalled"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&[format!("{}/news.xml", base)]);
    config.rate_limit_max_runs = 1;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let pipeline = VerificationPipeline::new(config, local_rules(), cache, clock);

    let first = pipeline.run().await?;
    assert!(!first.from_cache);
    let fresh_count = first.articles.len();

    let second = pipeline.run().await?;
    assert!(second.from_cache, "the second run must not touch the network");
    assert_eq!(second.articles.len(), fresh_count);
    assert_eq!(
        second.articles[0].link, first.articles[0].link,
        "the cached list should match the fresh one"
    );
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_without_cache_errors() -> Result<()> {
    init_tracing();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));

    let mut config = test_config(&["http://127.0.0.1:9/news.xml".to_string()]);
    config.rate_limit_max_runs = 0;

    let pipeline = VerificationPipeline::new(config, local_rules(), cache, clock);
    let err = pipeline
        .run()
        .await
        .expect_err("no budget and no cache leaves nothing to serve");
    assert!(matches!(err, VerifierError::RateLimited { .. }), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_overlapping_runs_are_single_flight() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/news.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(mixed_feed(&base), "application/rss+xml")
                .set_delay(std::time::Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/good"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE_BODY, "text/html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/paywalled"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let pipeline = VerificationPipeline::new(
        test_config(&[format!("{}/news.xml", base)]),
        local_rules(),
        cache,
        clock,
    );

    let (first, second) = tokio::join!(pipeline.run(), pipeline.run());
    let (first, second) = (first?, second?);
    assert!(
        first.from_cache != second.from_cache,
        "exactly one of two overlapping runs should do the work"
    );
    Ok(())
}

#[tokio::test]
async fn test_url_verifier_classifies_status_codes() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stories/live"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE_BODY, "text/html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stories/walled"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/updates.rss"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>feed</title></channel></rss>"#,
            "application/rss+xml",
        ))
        .mount(&server)
        .await;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let verifier = UrlVerifier::new(
        feed_verifier::rules::UrlVerifyRules::default(),
        cache,
        15,
        "FeedVerifier/1.0 (test)",
    );

    let live = verifier.verify(&format!("{}/stories/live", server.uri())).await;
    assert_eq!(live.status, VerificationStatus::Verified);
    assert!(live.accessible);
    assert!(live.is_direct_article, "the article page should classify as direct");

    let gone = verifier.verify(&format!("{}/stories/gone", server.uri())).await;
    assert_eq!(gone.status, VerificationStatus::Error);
    assert!(!gone.accessible);
    assert!(
        gone.error.as_deref().unwrap_or("").contains("404"),
        "the error should name the status code: {:?}",
        gone.error
    );

    let walled = verifier.verify(&format!("{}/stories/walled", server.uri())).await;
    assert_eq!(walled.status, VerificationStatus::Warning);
    assert!(!walled.accessible);

    let feed_page = verifier.verify(&format!("{}/updates.rss", server.uri())).await;
    assert!(feed_page.accessible);
    assert!(
        !feed_page.is_direct_article,
        "an RSS body must not classify as a direct article"
    );
    Ok(())
}

#[tokio::test]
async fn test_url_verifier_caches_within_ttl() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stories/cached"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE_BODY, "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let verifier = UrlVerifier::new(
        feed_verifier::rules::UrlVerifyRules::default(),
        cache,
        15,
        "FeedVerifier/1.0 (test)",
    );

    let url = format!("{}/stories/cached", server.uri());
    let first = verifier.verify(&url).await;
    let second = verifier.verify(&url).await;

    assert_eq!(first.status, second.status);
    assert_eq!(first.status_code, second.status_code);
    assert_eq!(first.is_direct_article, second.is_direct_article);
    // The expect(1) on the mock fails the test if a second request went out.
    Ok(())
}

#[tokio::test]
async fn test_url_verifier_handles_unreachable_host() -> Result<()> {
    init_tracing();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(clock.clone()));
    let verifier = UrlVerifier::new(
        feed_verifier::rules::UrlVerifyRules::default(),
        cache,
        2,
        "FeedVerifier/1.0 (test)",
    );

    // Port 9 (discard) refuses connections on loopback.
    let result = verifier.verify("http://127.0.0.1:9/stories/example").await;
    assert_eq!(result.status, VerificationStatus::Error);
    assert!(!result.accessible);
    assert_eq!(result.status_code, None);
    assert!(result.error.is_some());
    Ok(())
}
