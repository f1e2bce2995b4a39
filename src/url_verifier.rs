use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::rules::UrlVerifyRules;
use crate::types::VerificationStatus;

const TTL_VERIFIED_SECS: i64 = 3600;
const TTL_UNREACHABLE_SECS: i64 = 1800;
const TTL_NETWORK_FAILURE_SECS: i64 = 900;

/// Classification only needs the top of the page.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// Outcome of checking one source URL. This API never returns Err; anything
/// ambiguous degrades to a conservative record the decision stage can act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlVerification {
    pub status: VerificationStatus,
    pub accessible: bool,
    pub status_code: Option<u16>,
    pub is_direct_article: bool,
    pub error: Option<String>,
}

pub struct UrlVerifier {
    client: Client,
    rules: UrlVerifyRules,
    cache: Arc<dyn Cache>,
}

impl UrlVerifier {
    pub fn new(
        rules: UrlVerifyRules,
        cache: Arc<dyn Cache>,
        timeout_seconds: u64,
        user_agent: &str,
    ) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_seconds))
            .gzip(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            rules,
            cache,
        }
    }

    pub async fn verify(&self, url: &str) -> UrlVerification {
        let key = cache_key(url);
        if let Some(value) = self.cache.get(&key).await {
            if let Ok(cached) = serde_json::from_value::<UrlVerification>(value) {
                debug!("URL verification cache hit for {}", url);
                return cached;
            }
        }

        let (verification, ttl_secs) = self.verify_uncached(url).await;
        match serde_json::to_value(&verification) {
            Ok(value) => {
                self.cache
                    .set(&key, value, chrono::Duration::seconds(ttl_secs))
                    .await
            }
            Err(e) => warn!("Failed to cache URL verification for {}: {}", url, e),
        }
        verification
    }

    async fn verify_uncached(&self, url: &str) -> (UrlVerification, i64) {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("URL verification request failed for {}: {}", url, e);
                return (
                    UrlVerification {
                        status: VerificationStatus::Error,
                        accessible: false,
                        status_code: None,
                        is_direct_article: false,
                        error: Some(format!("Request failed: {}", e)),
                    },
                    TTL_NETWORK_FAILURE_SECS,
                );
            }
        };

        let code = response.status().as_u16();
        match code {
            200 => {
                let body = read_body_prefix(response).await;
                (
                    UrlVerification {
                        status: VerificationStatus::Verified,
                        accessible: true,
                        status_code: Some(code),
                        is_direct_article: self.looks_like_article(&body),
                        error: None,
                    },
                    TTL_VERIFIED_SECS,
                )
            }
            404 | 410 => (
                UrlVerification {
                    status: VerificationStatus::Error,
                    accessible: false,
                    status_code: Some(code),
                    is_direct_article: false,
                    error: Some(format!("Content not found (HTTP {})", code)),
                },
                TTL_UNREACHABLE_SECS,
            ),
            403 => (
                UrlVerification {
                    status: VerificationStatus::Warning,
                    accessible: false,
                    status_code: Some(code),
                    is_direct_article: false,
                    error: Some("Access forbidden (HTTP 403), possibly paywalled".to_string()),
                },
                TTL_UNREACHABLE_SECS,
            ),
            other => (
                UrlVerification {
                    status: VerificationStatus::Error,
                    accessible: false,
                    status_code: Some(other),
                    is_direct_article: false,
                    error: Some(format!("Unexpected HTTP status {}", other)),
                },
                TTL_UNREACHABLE_SECS,
            ),
        }
    }

    /// A page reads as a direct article when at least two article indicators
    /// appear and no feed indicator does.
    fn looks_like_article(&self, body: &str) -> bool {
        let lower = body.to_lowercase();
        let article_hits = self
            .rules
            .article_indicators
            .iter()
            .filter(|token| lower.contains(token.as_str()))
            .count();
        let feed_hits = self
            .rules
            .feed_indicators
            .iter()
            .filter(|token| lower.contains(token.as_str()))
            .count();
        article_hits >= 2 && feed_hits == 0
    }
}

async fn read_body_prefix(mut response: Response) -> String {
    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if body.len() + chunk.len() > MAX_BODY_BYTES {
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading verification body early: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("url_verification:{}", hex::encode(hasher.finalize()))
}
