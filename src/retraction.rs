use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rules::RetractionRules;

/// Confidence the matched keywords must clear before an article counts as
/// retracted.
pub const RETRACTION_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetractionSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RetractionSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetractionSeverity::None => "none",
            RetractionSeverity::Low => "low",
            RetractionSeverity::Medium => "medium",
            RetractionSeverity::High => "high",
            RetractionSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RetractionSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedKeyword {
    pub keyword: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetractionAnalysis {
    pub detected: bool,
    pub confidence: f64,
    pub severity: RetractionSeverity,
    pub matched: Vec<MatchedKeyword>,
}

impl RetractionAnalysis {
    pub fn clean() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            severity: RetractionSeverity::None,
            matched: Vec::new(),
        }
    }
}

/// Scans title plus body text for retraction and correction language using
/// the weighted keyword tiers from the rule table.
pub struct RetractionDetector {
    rules: RetractionRules,
}

impl RetractionDetector {
    pub fn new(rules: RetractionRules) -> Self {
        Self { rules }
    }

    pub fn analyze(&self, title: &str, body: &str) -> RetractionAnalysis {
        let text = format!("{} {}", title, body).trim().to_lowercase();
        let text_chars = text.chars().count();

        let tiers = [
            (&self.rules.high_keywords, self.rules.high_weight),
            (&self.rules.medium_keywords, self.rules.medium_weight),
            (&self.rules.low_keywords, self.rules.low_weight),
        ];

        let mut matched = Vec::new();
        for (keywords, weight) in tiers {
            for keyword in keywords {
                // Each keyword counts once no matter how often it appears.
                if text.contains(keyword.as_str()) {
                    matched.push(MatchedKeyword {
                        keyword: keyword.clone(),
                        weight,
                    });
                }
            }
        }

        if matched.is_empty() {
            return RetractionAnalysis::clean();
        }

        let mut confidence: f64 = matched.iter().map(|m| m.weight).sum();
        if text_chars > 1000 {
            confidence *= 1.2;
        } else if text_chars < 100 {
            confidence *= 0.8;
        }
        let confidence = confidence.min(1.0);

        let severity = grade_severity(&matched, confidence, self.rules.high_weight);
        let detected = confidence > RETRACTION_THRESHOLD;
        if detected {
            debug!(
                "Retraction language found: {} keywords, confidence {:.2}, severity {}",
                matched.len(),
                confidence,
                severity
            );
        }

        RetractionAnalysis {
            detected,
            confidence,
            severity,
            matched,
        }
    }
}

fn grade_severity(
    matched: &[MatchedKeyword],
    confidence: f64,
    high_weight: f64,
) -> RetractionSeverity {
    let high_matched = matched.iter().any(|m| m.weight >= high_weight);
    if high_matched && confidence > 0.5 {
        RetractionSeverity::Critical
    } else if matched.len() >= 3 || confidence > 0.7 {
        RetractionSeverity::High
    } else if matched.len() >= 2 || confidence > 0.4 {
        RetractionSeverity::Medium
    } else if !matched.is_empty() || confidence > 0.2 {
        RetractionSeverity::Low
    } else {
        RetractionSeverity::None
    }
}
