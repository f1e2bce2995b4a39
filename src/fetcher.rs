use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use feed_rs::parser;
use reqwest::{Client, Response};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::types::{FetchConfig, FetchedFeed, RawFeedItem, Result, VerifierError};

pub struct FeedFetcher {
    client: Client,
    config: FetchConfig,
}

impl FeedFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Fetch and parse one feed. Network, protocol and parse failures are
    /// retried with linear backoff; the final error means the caller skips
    /// this feed and moves on.
    pub async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(VerifierError::Validation(format!(
                "Unsupported feed URL scheme: {}",
                parsed.scheme()
            )));
        }

        debug!("Fetching feed: {}", url);

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = VerifierError::Validation(format!("No fetch attempts made for {}", url));

        for attempt in 1..=attempts {
            match self.fetch_once(url).await {
                Ok(feed) => {
                    info!("Fetched {}: {} items", url, feed.items.len());
                    return Ok(feed);
                }
                // Re-downloading an over-cap body cannot succeed.
                Err(e @ VerifierError::FeedTooLarge { .. }) => return Err(e),
                Err(e) => {
                    if attempt < attempts {
                        let delay =
                            Duration::from_millis(self.config.retry_base_delay_ms * attempt as u64);
                        warn!(
                            "Attempt {} failed for {} ({}), retrying in {:?}",
                            attempt, url, e, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = e;
                }
            }
        }

        error!("Failed to fetch feed after {} attempts: {}", attempts, url);
        Err(last_error)
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedFeed> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(VerifierError::Protocol {
                status: status.as_u16(),
            });
        }

        let body = self.read_capped(response).await?;
        parse_feed(url, &body)
    }

    /// Read the body in chunks, refusing anything over the configured cap.
    /// Content-Length is checked first but never trusted on its own.
    async fn read_capped(&self, mut response: Response) -> Result<Vec<u8>> {
        let limit = self.config.max_feed_bytes;

        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(VerifierError::FeedTooLarge {
                    size: length as usize,
                    limit,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(VerifierError::FeedTooLarge {
                    size: body.len() + chunk.len(),
                    limit,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Parse RSS 2.0 / Atom bytes into raw items, de-duplicating by guid and
/// link within the feed. Malformed XML and empty item sets are parse errors.
pub fn parse_feed(url: &str, body: &[u8]) -> Result<FetchedFeed> {
    let feed = parser::parse(body)
        .map_err(|e| VerifierError::Parse(format!("Failed to parse feed: {}", e)))?;

    let feed_title = feed.title.map(|t| t.content);

    let mut seen_guids = HashSet::new();
    let mut seen_links = HashSet::new();
    let mut items = Vec::new();

    for entry in feed.entries {
        let guid = if entry.id.is_empty() {
            None
        } else {
            Some(entry.id.clone())
        };
        if let Some(ref guid) = guid {
            if !seen_guids.insert(guid.clone()) {
                debug!("Skipping duplicate entry with GUID: {}", guid);
                continue;
            }
        }

        let link = entry.links.first().map(|l| l.href.clone());
        if let Some(ref link) = link {
            if !seen_links.insert(link.clone()) {
                debug!("Skipping duplicate entry with URL: {}", link);
                continue;
            }
        }

        let title = entry.title.map(|t| t.content);
        let description = entry.summary.map(|s| s.content);
        let content = entry.content.and_then(|c| c.body);
        let author = entry.authors.first().map(|a| a.name.clone());
        let published = entry.published.map(|dt| dt.with_timezone(&Utc));

        items.push(RawFeedItem {
            title,
            link,
            guid,
            description,
            content,
            author,
            published,
        });
    }

    if items.is_empty() {
        return Err(VerifierError::Parse(format!(
            "Feed at {} contains no items",
            url
        )));
    }

    Ok(FetchedFeed {
        url: url.to_string(),
        title: feed_title,
        items,
    })
}
