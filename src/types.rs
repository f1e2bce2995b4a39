use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured feed endpoint. Built from configuration, lives for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    pub url: String,
}

impl FeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A single feed entry as parsed, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawFeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// One fetched and parsed feed: channel metadata plus its items.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub url: String,
    pub title: Option<String>,
    pub items: Vec<RawFeedItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Warning,
    Error,
    Retracted,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Warning => "warning",
            VerificationStatus::Error => "error",
            VerificationStatus::Retracted => "retracted",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredibilityStatus {
    Trusted,
    Reliable,
    Neutral,
    Questionable,
    Unknown,
}

impl CredibilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredibilityStatus::Trusted => "trusted",
            CredibilityStatus::Reliable => "reliable",
            CredibilityStatus::Neutral => "neutral",
            CredibilityStatus::Questionable => "questionable",
            CredibilityStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CredibilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a credibility score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredibilitySource {
    Whitelist,
    Calculated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub source_name: String,
    pub domain: String,
    pub feed_url: String,
    pub credibility_score: f64,
    pub credibility_status: CredibilityStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalArticle {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub source_domain: String,
    pub verification_status: VerificationStatus,
    pub quality_score: f64,
    pub retraction_detected: bool,
    pub retraction_confidence: f64,
    pub publisher_info: PublisherInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredibilityRecord {
    pub domain: String,
    pub score: f64,
    pub status: CredibilityStatus,
    pub source: CredibilitySource,
    pub last_checked: DateTime<Utc>,
}

impl CredibilityRecord {
    /// Conservative default for domains with no evidence either way.
    pub fn unknown(domain: &str, now: DateTime<Utc>) -> Self {
        Self {
            domain: domain.to_string(),
            score: 50.0,
            status: CredibilityStatus::Unknown,
            source: CredibilitySource::Calculated,
            last_checked: now,
        }
    }
}

/// One audit row per verified item. Append-only, never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub post_id: Option<i64>,
    pub rss_item_hash: String,
    pub original_url: String,
    pub status: VerificationStatus,
    pub retraction_detected: bool,
    pub retraction_confidence: f64,
    pub source_legitimate: bool,
    pub content_accessible: Option<bool>,
    pub publisher_info: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationStats {
    pub total_records: i64,
    pub by_status: HashMap<String, i64>,
    pub retractions_detected: i64,
    pub avg_retraction_confidence: f64,
    pub flagged_domains: Vec<FlaggedDomain>,
}

/// A domain that produced more than the allowed number of problem records
/// inside the reporting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedDomain {
    pub domain: String,
    pub issue_count: i64,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub max_feed_bytes: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "FeedVerifier/1.0".to_string(),
            timeout_seconds: 30,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            max_feed_bytes: 1024 * 1024,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub feeds: Vec<FeedSource>,
    pub fetch: FetchConfig,
    pub verify_source_urls: bool,
    pub url_verify_timeout_seconds: u64,
    pub max_articles: usize,
    pub article_cache_ttl_seconds: u64,
    pub fetch_concurrency: usize,
    pub url_verify_concurrency: usize,
    pub rate_limit_max_runs: usize,
    pub rate_limit_window_seconds: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            feeds: default_feeds(),
            fetch: FetchConfig::default(),
            verify_source_urls: true,
            url_verify_timeout_seconds: 15,
            max_articles: 10,
            article_cache_ttl_seconds: 1800,
            fetch_concurrency: 4,
            url_verify_concurrency: 4,
            rate_limit_max_runs: 10,
            rate_limit_window_seconds: 300,
        }
    }
}

/// Feeds used when no list is configured.
pub fn default_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::new("https://feeds.bbci.co.uk/news/rss.xml"),
        FeedSource::new("https://rss.cnn.com/rss/edition.rss"),
        FeedSource::new("https://feeds.npr.org/1001/rss.xml"),
        FeedSource::new("https://www.theguardian.com/world/rss"),
        FeedSource::new("https://www.aljazeera.com/xml/rss/all.xml"),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error status: {status}")]
    Protocol { status: u16 },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Feed size exceeds limit: {size} bytes (limit {limit})")]
    FeedTooLarge { size: usize, limit: usize },

    #[error("Invalid item: {0}")]
    Validation(String),

    #[error("Rate limited: {runs} runs inside {window_secs}s window")]
    RateLimited { runs: usize, window_secs: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VerifierError>;
