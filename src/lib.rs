pub mod types;
pub mod rules;
pub mod clock;
pub mod cache;
pub mod fetcher;
pub mod normalizer;
pub mod credibility;
pub mod legitimacy;
pub mod retraction;
pub mod url_verifier;
pub mod rate_limit;
pub mod recorder;
pub mod pipeline;

pub use types::*;
pub use rules::RuleSet;
pub use clock::{Clock, ManualClock, SystemClock};
pub use cache::{Cache, MemoryCache};
pub use fetcher::FeedFetcher;
pub use normalizer::ItemNormalizer;
pub use credibility::CredibilityStore;
pub use legitimacy::{LegitimacyAnalyzer, LegitimacyReport};
pub use retraction::{RetractionAnalysis, RetractionDetector, RetractionSeverity};
pub use url_verifier::{UrlVerification, UrlVerifier};
pub use rate_limit::RunRateLimiter;
pub use recorder::{MemoryVerificationStore, PgVerificationStore, VerificationStore};
pub use pipeline::{decide, Decision, RunReport, VerificationPipeline, MAX_FEEDS};
