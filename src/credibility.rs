use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::clock::Clock;
use crate::rules::CredibilityRules;
use crate::types::{CredibilityRecord, CredibilitySource, CredibilityStatus};

const CACHE_TTL_HOURS: i64 = 24;

/// Two-tier domain trust lookup: a static whitelist of known outlets first,
/// then a cached heuristic score for everything else. Never errors; a domain
/// with no evidence gets the neutral default.
pub struct CredibilityStore {
    rules: CredibilityRules,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl CredibilityStore {
    pub fn new(rules: CredibilityRules, cache: Arc<dyn Cache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules,
            cache,
            clock,
        }
    }

    pub async fn domain_credibility(&self, domain: &str) -> CredibilityRecord {
        let domain = domain.to_lowercase();
        if domain.is_empty() {
            return CredibilityRecord::unknown(&domain, self.clock.now());
        }

        if let Some(score) = self.rules.whitelist_score(&domain) {
            return CredibilityRecord {
                domain,
                score,
                status: status_for_score(score),
                source: CredibilitySource::Whitelist,
                last_checked: self.clock.now(),
            };
        }

        let key = format!("credibility:{}", domain);
        if let Some(value) = self.cache.get(&key).await {
            match serde_json::from_value::<CredibilityRecord>(value) {
                Ok(record) => {
                    debug!("Credibility cache hit for {}", domain);
                    return record;
                }
                Err(e) => warn!(
                    "Discarding unreadable credibility cache entry for {}: {}",
                    domain, e
                ),
            }
        }

        let score = calculate_domain_score(&domain, &self.rules);
        let record = CredibilityRecord {
            domain: domain.clone(),
            score,
            status: status_for_score(score),
            source: CredibilitySource::Calculated,
            last_checked: self.clock.now(),
        };
        match serde_json::to_value(&record) {
            Ok(value) => {
                self.cache
                    .set(&key, value, Duration::hours(CACHE_TTL_HOURS))
                    .await
            }
            Err(e) => warn!("Failed to cache credibility for {}: {}", domain, e),
        }
        record
    }
}

/// Map a 0-100 score onto the trust bands.
pub fn status_for_score(score: f64) -> CredibilityStatus {
    if score >= 80.0 {
        CredibilityStatus::Trusted
    } else if score >= 60.0 {
        CredibilityStatus::Reliable
    } else if score >= 40.0 {
        CredibilityStatus::Neutral
    } else {
        CredibilityStatus::Questionable
    }
}

/// Heuristic score for domains off the whitelist: base 50, adjusted by TLD
/// and name signals, clamped to [0, 100].
pub fn calculate_domain_score(domain: &str, rules: &CredibilityRules) -> f64 {
    let mut score: f64 = 50.0;

    if domain.ends_with(".com") {
        score += 5.0;
    }
    if rules
        .news_keywords
        .iter()
        .any(|kw| domain.contains(kw.as_str()))
    {
        score += 10.0;
    }
    if domain.ends_with(".gov") {
        score += 15.0;
    }
    if domain.ends_with(".edu") {
        score += 10.0;
    }
    if rules
        .questionable_tlds
        .iter()
        .any(|tld| domain.ends_with(tld.as_str()))
    {
        score -= 20.0;
    }
    if rules
        .suspicious_fragments
        .iter()
        .any(|fragment| domain.contains(fragment.as_str()))
    {
        score -= 15.0;
    }

    score.clamp(0.0, 100.0)
}
