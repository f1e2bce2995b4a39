use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::Result;

/// Heuristic tables driving the analyzers. Everything here is data so a
/// deployment can tune scoring without touching code; `RuleSet::default()`
/// carries the built-in tables. Phrases and keywords are matched
/// case-insensitively and should be stored lowercase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub credibility: CredibilityRules,
    pub spam: SpamRules,
    pub retraction: RetractionRules,
    pub url_verify: UrlVerifyRules,
}

impl RuleSet {
    /// Load a rule table from JSON. Absent sections keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub domain: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityRules {
    pub whitelist: Vec<WhitelistEntry>,
    pub news_keywords: Vec<String>,
    pub questionable_tlds: Vec<String>,
    pub suspicious_fragments: Vec<String>,
}

impl CredibilityRules {
    /// Exact or dot-boundary suffix match, so `news.bbc.co.uk` hits the
    /// `bbc.co.uk` entry but `notbbc.co.uk` does not.
    pub fn whitelist_score(&self, domain: &str) -> Option<f64> {
        self.whitelist.iter().find_map(|entry| {
            let suffix = format!(".{}", entry.domain);
            if domain == entry.domain || domain.ends_with(&suffix) {
                Some(entry.score)
            } else {
                None
            }
        })
    }
}

impl Default for CredibilityRules {
    fn default() -> Self {
        Self {
            whitelist: [
                ("reuters.com", 98.0),
                ("apnews.com", 97.0),
                ("bbc.co.uk", 95.0),
                ("bbc.com", 95.0),
                ("npr.org", 92.0),
                ("theguardian.com", 90.0),
                ("nytimes.com", 90.0),
                ("economist.com", 90.0),
                ("ft.com", 90.0),
                ("washingtonpost.com", 88.0),
                ("bloomberg.com", 88.0),
                ("wsj.com", 88.0),
                ("aljazeera.com", 85.0),
                ("cnn.com", 83.0),
            ]
            .into_iter()
            .map(|(domain, score)| WhitelistEntry {
                domain: domain.to_string(),
                score,
            })
            .collect(),
            news_keywords: strings(&[
                "news", "times", "post", "herald", "tribune", "daily", "journal", "gazette",
                "chronicle", "observer", "press",
            ]),
            questionable_tlds: strings(&[".tk", ".ml", ".ga", ".cf", ".gq"]),
            suspicious_fragments: strings(&["free", "download", "click", "win"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamPhrase {
    pub phrase: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamRules {
    pub phrases: Vec<SpamPhrase>,
    /// Shouting and clickbait markers that lower title quality.
    pub clickbait_patterns: Vec<String>,
}

impl Default for SpamRules {
    fn default() -> Self {
        let phrases = [
            ("buy now", "commercial call to action"),
            ("limited time offer", "commercial pressure tactic"),
            ("act now", "commercial pressure tactic"),
            ("click here", "clickbait call to action"),
            ("100% free", "too-good-to-be-true offer"),
            ("make money fast", "get-rich-quick scheme"),
            ("miracle cure", "health misinformation marker"),
            ("lose weight fast", "health spam marker"),
            ("you have been selected", "prize scam phrasing"),
            ("casino bonus", "gambling spam"),
        ]
        .into_iter()
        .map(|(phrase, reason)| SpamPhrase {
            phrase: phrase.to_string(),
            reason: reason.to_string(),
        })
        .collect();

        Self {
            phrases,
            clickbait_patterns: strings(&[
                "!!!",
                "???",
                "shocking",
                "you won't believe",
                "doctors hate",
                "this one trick",
                "what happens next",
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetractionRules {
    pub high_keywords: Vec<String>,
    pub medium_keywords: Vec<String>,
    pub low_keywords: Vec<String>,
    pub high_weight: f64,
    pub medium_weight: f64,
    pub low_weight: f64,
}

impl Default for RetractionRules {
    fn default() -> Self {
        Self {
            high_keywords: strings(&[
                "retracted",
                "retraction",
                "withdrawn",
                "correction",
                "erratum",
            ]),
            medium_keywords: strings(&[
                "amended",
                "revised",
                "clarification",
                "apology",
                "factual error",
            ]),
            low_keywords: strings(&[
                "editor's note",
                "updated to reflect",
                "earlier version",
                "regret the error",
            ]),
            high_weight: 0.4,
            medium_weight: 0.25,
            low_weight: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlVerifyRules {
    pub article_indicators: Vec<String>,
    pub feed_indicators: Vec<String>,
}

impl Default for UrlVerifyRules {
    fn default() -> Self {
        Self {
            article_indicators: strings(&["article", "author", "published", "headline", "byline"]),
            feed_indicators: strings(&["rss", "<?xml", "feed"]),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
