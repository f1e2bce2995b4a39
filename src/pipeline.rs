use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::clock::Clock;
use crate::credibility::CredibilityStore;
use crate::fetcher::FeedFetcher;
use crate::legitimacy::{LegitimacyAnalyzer, LegitimacyReport};
use crate::normalizer::ItemNormalizer;
use crate::rate_limit::RunRateLimiter;
use crate::recorder::VerificationStore;
use crate::retraction::{RetractionAnalysis, RetractionDetector, RetractionSeverity};
use crate::rules::RuleSet;
use crate::types::{
    CanonicalArticle, Result, VerificationRecord, VerificationStatus, VerifierConfig,
    VerifierError,
};
use crate::url_verifier::{UrlVerification, UrlVerifier};

/// Hard cap on configured feeds per run; extras are dropped with a warning.
pub const MAX_FEEDS: usize = 20;

const ARTICLE_CACHE_KEY: &str = "verified_articles";

/// What the pipeline decided to do with one article.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept,
    Flag {
        reasons: Vec<String>,
    },
    Skip {
        reason: String,
        status: VerificationStatus,
    },
}

/// Accepted article list plus counters for one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub articles: Vec<CanonicalArticle>,
    pub from_cache: bool,
    pub feeds_fetched: usize,
    pub feeds_failed: usize,
    pub items_seen: usize,
    pub items_dropped: usize,
    pub accepted: usize,
    pub flagged: usize,
    pub skipped: usize,
}

impl RunReport {
    fn fresh(run_id: Uuid) -> Self {
        Self {
            run_id,
            articles: Vec::new(),
            from_cache: false,
            feeds_fetched: 0,
            feeds_failed: 0,
            items_seen: 0,
            items_dropped: 0,
            accepted: 0,
            flagged: 0,
            skipped: 0,
        }
    }

    fn cached(run_id: Uuid, articles: Vec<CanonicalArticle>) -> Self {
        let mut report = Self::fresh(run_id);
        report.from_cache = true;
        report.articles = articles;
        report
    }
}

struct Assessment {
    article: CanonicalArticle,
    legitimacy: LegitimacyReport,
    retraction: RetractionAnalysis,
    url_verification: Option<UrlVerification>,
}

pub struct VerificationPipeline {
    config: VerifierConfig,
    fetcher: FeedFetcher,
    normalizer: ItemNormalizer,
    legitimacy: LegitimacyAnalyzer,
    retraction: RetractionDetector,
    url_verifier: Option<UrlVerifier>,
    store: Option<Arc<dyn VerificationStore>>,
    cache: Arc<dyn Cache>,
    rate_limiter: RunRateLimiter,
    run_guard: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl VerificationPipeline {
    pub fn new(
        mut config: VerifierConfig,
        rules: RuleSet,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if config.feeds.len() > MAX_FEEDS {
            warn!(
                "Dropping {} feeds beyond the {} feed cap",
                config.feeds.len() - MAX_FEEDS,
                MAX_FEEDS
            );
            config.feeds.truncate(MAX_FEEDS);
        }

        let fetcher = FeedFetcher::new(config.fetch.clone());
        let normalizer = ItemNormalizer::new(clock.clone());
        let credibility = Arc::new(CredibilityStore::new(
            rules.credibility,
            cache.clone(),
            clock.clone(),
        ));
        let legitimacy = LegitimacyAnalyzer::new(rules.spam, credibility);
        let retraction = RetractionDetector::new(rules.retraction);
        let url_verifier = if config.verify_source_urls {
            Some(UrlVerifier::new(
                rules.url_verify,
                cache.clone(),
                config.url_verify_timeout_seconds,
                &config.fetch.user_agent,
            ))
        } else {
            None
        };
        let rate_limiter = RunRateLimiter::new(
            config.rate_limit_max_runs,
            config.rate_limit_window_seconds,
            clock.clone(),
        );

        Self {
            config,
            fetcher,
            normalizer,
            legitimacy,
            retraction,
            url_verifier,
            store: None,
            cache,
            rate_limiter,
            run_guard: Mutex::new(()),
            clock,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn VerificationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run one verification cycle over the configured feeds.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();

        // Overlapping invocations reuse the previous result instead of
        // starting a second cycle.
        let _guard = match self.run_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Verification run already in progress, serving cached results");
                let articles = self.cached_articles().await.unwrap_or_default();
                return Ok(RunReport::cached(run_id, articles));
            }
        };

        if !self.rate_limiter.try_acquire().await {
            return match self.cached_articles().await {
                Some(articles) => {
                    info!("Rate limited, serving {} cached articles", articles.len());
                    Ok(RunReport::cached(run_id, articles))
                }
                None => Err(VerifierError::RateLimited {
                    runs: self.rate_limiter.max_runs(),
                    window_secs: self.rate_limiter.window_seconds(),
                }),
            };
        }

        info!(
            "Starting verification run {} over {} feeds",
            run_id,
            self.config.feeds.len()
        );

        let mut report = RunReport::fresh(run_id);

        let fetches: Vec<_> = stream::iter(&self.config.feeds)
            .map(|source| async move {
                (source.url.clone(), self.fetcher.fetch(&source.url).await)
            })
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut assessments = Vec::new();
        for (url, outcome) in fetches {
            match outcome {
                Ok(feed) => {
                    report.feeds_fetched += 1;
                    report.items_seen += feed.items.len();
                    for item in &feed.items {
                        match self.normalizer.normalize(item, &feed) {
                            Ok(article) => assessments.push(self.assess(article).await),
                            Err(e) => {
                                debug!("Dropping item from {}: {}", url, e);
                                report.items_dropped += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    report.feeds_failed += 1;
                    warn!("Skipping feed {}: {}", url, e);
                }
            }
        }

        self.verify_source_urls(&mut assessments).await;

        let mut accepted = Vec::new();
        let mut upserted_domains = HashSet::new();

        for mut assessment in assessments {
            let decision = decide(
                &assessment.legitimacy,
                &assessment.retraction,
                assessment.url_verification.as_ref(),
            );

            match &decision {
                Decision::Accept => {
                    assessment.article.verification_status = VerificationStatus::Verified;
                    report.accepted += 1;
                }
                Decision::Flag { reasons } => {
                    assessment.article.verification_status = VerificationStatus::Warning;
                    report.flagged += 1;
                    debug!("Flagged {}: {}", assessment.article.link, reasons.join("; "));
                }
                Decision::Skip { reason, status } => {
                    assessment.article.verification_status = *status;
                    report.skipped += 1;
                    info!("Skipping {}: {}", assessment.article.link, reason);
                }
            }

            if upserted_domains.insert(assessment.article.source_domain.clone()) {
                self.upsert_source(&assessment).await;
            }
            self.persist(run_id, &assessment, &decision).await;

            if matches!(decision, Decision::Accept | Decision::Flag { .. }) {
                accepted.push(assessment.article);
            }
        }

        accepted.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        accepted.truncate(self.config.max_articles);

        match serde_json::to_value(&accepted) {
            Ok(value) => {
                self.cache
                    .set(
                        ARTICLE_CACHE_KEY,
                        value,
                        chrono::Duration::seconds(self.config.article_cache_ttl_seconds as i64),
                    )
                    .await;
            }
            Err(e) => warn!("Failed to cache article list: {}", e),
        }

        report.articles = accepted;
        info!(
            "Run {} complete: {} feeds fetched, {} failed, {} accepted, {} flagged, {} skipped",
            run_id,
            report.feeds_fetched,
            report.feeds_failed,
            report.accepted,
            report.flagged,
            report.skipped
        );

        Ok(report)
    }

    async fn assess(&self, mut article: CanonicalArticle) -> Assessment {
        let legitimacy = self.legitimacy.analyze(&article).await;
        article.publisher_info.credibility_score = legitimacy.credibility.score;
        article.publisher_info.credibility_status = legitimacy.credibility.status;
        article.quality_score = legitimacy.title_quality;

        let retraction = self.retraction.analyze(&article.title, &article.description);
        article.retraction_detected = retraction.detected;
        article.retraction_confidence = retraction.confidence;

        Assessment {
            article,
            legitimacy,
            retraction,
            url_verification: None,
        }
    }

    /// Check reachability of every article that survived the analyzer
    /// stages, through its own bounded pool.
    async fn verify_source_urls(&self, assessments: &mut [Assessment]) {
        let Some(verifier) = &self.url_verifier else {
            return;
        };

        let candidates: Vec<(usize, String)> = assessments
            .iter()
            .enumerate()
            .filter(|(_, a)| !already_disqualified(a))
            .map(|(index, a)| (index, a.article.link.clone()))
            .collect();

        let results: Vec<(usize, UrlVerification)> = stream::iter(candidates)
            .map(|(index, url)| async move { (index, verifier.verify(&url).await) })
            .buffer_unordered(self.config.url_verify_concurrency.max(1))
            .collect()
            .await;

        for (index, verification) in results {
            assessments[index].url_verification = Some(verification);
        }
    }

    async fn upsert_source(&self, assessment: &Assessment) {
        let Some(store) = &self.store else {
            return;
        };
        let credibility = &assessment.legitimacy.credibility;
        let source_name = &assessment.article.publisher_info.source_name;
        if let Err(e) = store.upsert_credibility(credibility, source_name).await {
            warn!(
                "Failed to upsert credibility for {}: {}",
                credibility.domain, e
            );
        }
    }

    /// Best effort: persistence failures are logged and never block results.
    async fn persist(&self, run_id: Uuid, assessment: &Assessment, decision: &Decision) {
        let Some(store) = &self.store else {
            return;
        };
        let article = &assessment.article;

        let publisher_info = match serde_json::to_value(&article.publisher_info) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize publisher info for {}: {}", article.link, e);
                serde_json::Value::Null
            }
        };
        let metadata = serde_json::json!({
            "run_id": run_id,
            "feed_url": article.publisher_info.feed_url,
            "decision": decision_label(decision),
            "issues": assessment.legitimacy.issues,
            "warnings": assessment.legitimacy.warnings,
            "retraction_severity": assessment.retraction.severity,
            "retraction_keywords": assessment.retraction.matched,
            "direct_article": assessment
                .url_verification
                .as_ref()
                .map(|v| v.is_direct_article),
        });

        let record = VerificationRecord {
            post_id: None,
            rss_item_hash: item_hash(article),
            original_url: article.link.clone(),
            status: article.verification_status,
            retraction_detected: article.retraction_detected,
            retraction_confidence: article.retraction_confidence,
            source_legitimate: assessment.legitimacy.legitimate,
            content_accessible: assessment.url_verification.as_ref().map(|v| v.accessible),
            publisher_info,
            metadata,
            created_at: self.clock.now(),
        };

        if let Err(e) = store.record(&record).await {
            warn!("Failed to record verification for {}: {}", article.link, e);
        }
    }

    async fn cached_articles(&self) -> Option<Vec<CanonicalArticle>> {
        let value = self.cache.get(ARTICLE_CACHE_KEY).await?;
        match serde_json::from_value(value) {
            Ok(articles) => Some(articles),
            Err(e) => {
                warn!("Discarding unreadable cached article list: {}", e);
                None
            }
        }
    }
}

/// The decision table. Skips win over flags; an article flagged on several
/// grounds carries every reason.
pub fn decide(
    legitimacy: &LegitimacyReport,
    retraction: &RetractionAnalysis,
    url_verification: Option<&UrlVerification>,
) -> Decision {
    if matches!(
        retraction.severity,
        RetractionSeverity::Critical | RetractionSeverity::High
    ) {
        return Decision::Skip {
            reason: format!(
                "Retraction detected with {} severity (confidence {:.2})",
                retraction.severity, retraction.confidence
            ),
            status: VerificationStatus::Retracted,
        };
    }

    if !legitimacy.legitimate {
        return Decision::Skip {
            reason: format!(
                "Failed legitimacy checks: {}",
                legitimacy.issues.join("; ")
            ),
            status: VerificationStatus::Error,
        };
    }

    let mut reasons = legitimacy.warnings.clone();

    if let Some(verification) = url_verification {
        match verification.status {
            VerificationStatus::Error => {
                return Decision::Skip {
                    reason: verification
                        .error
                        .clone()
                        .unwrap_or_else(|| "Source URL not accessible".to_string()),
                    status: VerificationStatus::Error,
                };
            }
            VerificationStatus::Warning => {
                reasons.push(
                    verification
                        .error
                        .clone()
                        .unwrap_or_else(|| "Source URL access restricted".to_string()),
                );
            }
            _ => {}
        }
    }

    if retraction.severity == RetractionSeverity::Medium {
        reasons.push(format!(
            "Correction language present (confidence {:.2})",
            retraction.confidence
        ));
    }

    if reasons.is_empty() {
        Decision::Accept
    } else {
        Decision::Flag { reasons }
    }
}

fn already_disqualified(assessment: &Assessment) -> bool {
    matches!(
        assessment.retraction.severity,
        RetractionSeverity::Critical | RetractionSeverity::High
    ) || !assessment.legitimacy.legitimate
}

fn decision_label(decision: &Decision) -> &'static str {
    match decision {
        Decision::Accept => "accept",
        Decision::Flag { .. } => "flag",
        Decision::Skip { .. } => "skip",
    }
}

/// Stable identity for one item: its article link plus title.
fn item_hash(article: &CanonicalArticle) -> String {
    let mut hasher = Sha256::new();
    hasher.update(article.link.as_bytes());
    hasher.update(article.title.as_bytes());
    hex::encode(hasher.finalize())
}
