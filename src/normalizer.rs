use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::clock::Clock;
use crate::types::{
    CanonicalArticle, CredibilityStatus, FetchedFeed, PublisherInfo, RawFeedItem, Result,
    VerificationStatus, VerifierError,
};

const MAX_TITLE_CHARS: usize = 300;
const MAX_DESCRIPTION_CHARS: usize = 2000;

/// URL fragments that mark a candidate link as pointing back at a feed
/// rather than an article page.
const SELF_REFERENCE_FRAGMENTS: [&str; 4] = ["/rss", "/feed", "feed=", "atom"];

pub struct ItemNormalizer {
    clock: Arc<dyn Clock>,
}

impl ItemNormalizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Convert one raw entry into a canonical article. Items without a
    /// usable title or article link are rejected; the caller drops that
    /// item and keeps going.
    pub fn normalize(&self, item: &RawFeedItem, feed: &FetchedFeed) -> Result<CanonicalArticle> {
        let title = truncate_chars(
            &strip_html(item.title.as_deref().unwrap_or("")),
            MAX_TITLE_CHARS,
        );
        if title.is_empty() {
            return Err(VerifierError::Validation(
                "Item has no usable title".to_string(),
            ));
        }

        let url = select_original_url(item).ok_or_else(|| {
            VerifierError::Validation("Item has no usable article link".to_string())
        })?;
        let source_domain = domain_of(&url);

        let description_raw = item
            .description
            .as_deref()
            .or(item.content.as_deref())
            .unwrap_or("");
        let description = truncate_chars(&strip_html(description_raw), MAX_DESCRIPTION_CHARS);

        let published_at = item.published.unwrap_or_else(|| {
            debug!("No publish date on item from {}, using current time", feed.url);
            self.clock.now()
        });

        let source_name = feed
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| source_domain.clone());

        Ok(CanonicalArticle {
            title,
            link: url.to_string(),
            description,
            published_at,
            source_domain: source_domain.clone(),
            verification_status: VerificationStatus::Unverified,
            quality_score: 0.0,
            retraction_detected: false,
            retraction_confidence: 0.0,
            publisher_info: PublisherInfo {
                source_name,
                domain: source_domain,
                feed_url: feed.url.clone(),
                credibility_score: 50.0,
                credibility_status: CredibilityStatus::Unknown,
            },
        })
    }
}

/// Pick the best article link: the entry link first, then a guid that parses
/// as an http(s) URL. Candidates that point back at a feed are rejected.
fn select_original_url(item: &RawFeedItem) -> Option<Url> {
    let candidates = [item.link.as_deref(), item.guid.as_deref()];
    for candidate in candidates.into_iter().flatten() {
        let candidate = candidate.trim();
        if candidate.is_empty() || is_self_reference(candidate) {
            continue;
        }
        if let Ok(url) = Url::parse(candidate) {
            if matches!(url.scheme(), "http" | "https") {
                return Some(url);
            }
        }
    }
    None
}

fn is_self_reference(candidate: &str) -> bool {
    let lower = candidate.to_lowercase();
    SELF_REFERENCE_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

fn domain_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).to_lowercase()
}

/// Drop tags, decode entities, collapse whitespace.
pub fn strip_html(input: &str) -> String {
    let (without_tags, _) = input.chars().fold(
        (String::with_capacity(input.len()), false),
        |(mut out, in_tag), c| match c {
            '<' => (out, true),
            '>' => (out, false),
            _ if in_tag => (out, in_tag),
            _ => {
                out.push(c);
                (out, in_tag)
            }
        },
    );
    let decoded = html_escape::decode_html_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Char-boundary-safe truncation that prefers the last word break when one
/// sits past the halfway mark.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let hard: String = text.chars().take(max_chars).collect();
    let cut = match hard.rfind(' ') {
        Some(pos) if pos > hard.len() / 2 => &hard[..pos],
        _ => hard.as_str(),
    };
    format!("{}...", cut.trim_end())
}
