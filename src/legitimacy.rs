use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credibility::CredibilityStore;
use crate::rules::SpamRules;
use crate::types::{CanonicalArticle, CredibilityRecord};

/// Title quality an article must reach to pass the gate.
pub const MIN_TITLE_QUALITY: f64 = 0.5;
/// Minimum description length in chars.
pub const MIN_DESCRIPTION_CHARS: usize = 50;
/// Credibility at or below this is disqualifying on its own.
pub const CREDIBILITY_FLOOR: f64 = 30.0;
/// Scores at or below this leave an article publishable but flagged.
pub const CREDIBILITY_MARGINAL: f64 = 60.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamIndicator {
    pub phrase: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct LegitimacyReport {
    pub legitimate: bool,
    pub title_quality: f64,
    pub spam_indicators: Vec<SpamIndicator>,
    pub credibility: CredibilityRecord,
    /// Hard failures. Any entry here makes the article illegitimate.
    pub issues: Vec<String>,
    /// Soft conditions. The article stays publishable but gets flagged.
    pub warnings: Vec<String>,
}

pub struct LegitimacyAnalyzer {
    rules: SpamRules,
    credibility: Arc<CredibilityStore>,
}

impl LegitimacyAnalyzer {
    pub fn new(rules: SpamRules, credibility: Arc<CredibilityStore>) -> Self {
        Self { rules, credibility }
    }

    pub async fn analyze(&self, article: &CanonicalArticle) -> LegitimacyReport {
        let title_quality = self.title_quality(&article.title);
        let spam_indicators = self.spam_indicators(&article.title, &article.description);
        let credibility = self
            .credibility
            .domain_credibility(&article.source_domain)
            .await;

        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        for indicator in &spam_indicators {
            issues.push(format!(
                "Spam phrase \"{}\": {}",
                indicator.phrase, indicator.reason
            ));
        }

        if credibility.score <= CREDIBILITY_FLOOR {
            issues.push(format!(
                "Source credibility {:.0} at or below floor {:.0}",
                credibility.score, CREDIBILITY_FLOOR
            ));
        } else if credibility.score <= CREDIBILITY_MARGINAL {
            warnings.push(format!(
                "Source credibility {:.0} below the reliable band",
                credibility.score
            ));
        }

        if title_quality < MIN_TITLE_QUALITY {
            issues.push(format!(
                "Title quality {:.2} under minimum {:.2}",
                title_quality, MIN_TITLE_QUALITY
            ));
        } else if title_quality < 0.7 {
            warnings.push(format!("Borderline title quality {:.2}", title_quality));
        }

        let description_chars = article.description.chars().count();
        if description_chars < MIN_DESCRIPTION_CHARS {
            issues.push(format!(
                "Description too short: {} chars, minimum {}",
                description_chars, MIN_DESCRIPTION_CHARS
            ));
        } else if description_chars < 100 {
            warnings.push(format!("Short description: {} chars", description_chars));
        }

        let legitimate = issues.is_empty();
        if !legitimate {
            debug!(
                "Article from {} failed legitimacy: {}",
                article.source_domain,
                issues.join("; ")
            );
        }

        LegitimacyReport {
            legitimate,
            title_quality,
            spam_indicators,
            credibility,
            issues,
            warnings,
        }
    }

    /// Score a headline on length, capitalization shape and clickbait
    /// markers. Base 0.5, bonuses and penalties clamp into [0, 1].
    pub fn title_quality(&self, title: &str) -> f64 {
        let mut score: f64 = 0.5;

        let length = title.chars().count();
        if length > 10 && length < 150 {
            score += 0.2;
        }

        let words: Vec<&str> = title.split_whitespace().collect();
        if !words.is_empty() {
            let capitalized = words
                .iter()
                .filter(|word| word.chars().next().map_or(false, char::is_uppercase))
                .count();
            let ratio = capitalized as f64 / words.len() as f64;
            if ratio > 0.3 && ratio < 0.8 {
                score += 0.2;
            }
        }

        let lower = title.to_lowercase();
        if self
            .rules
            .clickbait_patterns
            .iter()
            .any(|pattern| lower.contains(pattern.as_str()))
        {
            score -= 0.3;
        }

        score.clamp(0.0, 1.0)
    }

    /// Substring scan of title and description against the spam phrase table.
    pub fn spam_indicators(&self, title: &str, description: &str) -> Vec<SpamIndicator> {
        let text = format!("{} {}", title, description).to_lowercase();
        self.rules
            .phrases
            .iter()
            .filter(|entry| text.contains(entry.phrase.as_str()))
            .map(|entry| SpamIndicator {
                phrase: entry.phrase.clone(),
                reason: entry.reason.clone(),
            })
            .collect()
    }
}
