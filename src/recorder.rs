use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use tracing::info;

use crate::clock::Clock;
use crate::types::{
    CredibilityRecord, CredibilitySource, FlaggedDomain, Result, VerificationRecord,
    VerificationStats, VerificationStatus,
};

/// Domains with more problem rows than this inside the reporting window are
/// listed in the stats.
const DOMAIN_ISSUE_THRESHOLD: i64 = 5;

/// Persistence seam for audit rows and source credibility.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Append one audit row; returns its id. Rows are never mutated later.
    async fn record(&self, record: &VerificationRecord) -> Result<i64>;

    /// Insert or refresh a source row; the latest write wins.
    async fn upsert_credibility(
        &self,
        record: &CredibilityRecord,
        source_name: &str,
    ) -> Result<()>;

    /// Aggregate reporting over the last `window_days` days.
    async fn stats(&self, window_days: i64) -> Result<VerificationStats>;
}

pub struct PgVerificationStore {
    pool: PgPool,
}

impl PgVerificationStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verified_sources (
                id BIGSERIAL PRIMARY KEY,
                domain VARCHAR(255) NOT NULL UNIQUE,
                source_name VARCHAR(255) NOT NULL,
                credibility_score DOUBLE PRECISION NOT NULL,
                verification_status VARCHAR(32) NOT NULL,
                last_checked TIMESTAMP WITH TIME ZONE NOT NULL,
                details TEXT,
                metadata JSONB,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_verification (
                id BIGSERIAL PRIMARY KEY,
                post_id BIGINT,
                rss_item_hash VARCHAR(64) NOT NULL,
                original_url TEXT NOT NULL,
                status VARCHAR(32) NOT NULL,
                retraction_detected BOOLEAN NOT NULL DEFAULT FALSE,
                retraction_confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
                source_legitimate BOOLEAN NOT NULL DEFAULT TRUE,
                content_accessible BOOLEAN,
                publisher_info JSONB,
                metadata JSONB,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_content_verification_status ON content_verification (status)",
            "CREATE INDEX IF NOT EXISTS idx_content_verification_created_at ON content_verification (created_at)",
            "CREATE INDEX IF NOT EXISTS idx_content_verification_hash ON content_verification (rss_item_hash)",
            "CREATE INDEX IF NOT EXISTS idx_verified_sources_domain ON verified_sources (domain)",
        ];
        for statement in indexes {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Verification schema ready");
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for PgVerificationStore {
    async fn record(&self, record: &VerificationRecord) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO content_verification (
                post_id, rss_item_hash, original_url, status,
                retraction_detected, retraction_confidence, source_legitimate,
                content_accessible, publisher_info, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(record.post_id)
        .bind(&record.rss_item_hash)
        .bind(&record.original_url)
        .bind(record.status.as_str())
        .bind(record.retraction_detected)
        .bind(record.retraction_confidence)
        .bind(record.source_legitimate)
        .bind(record.content_accessible)
        .bind(&record.publisher_info)
        .bind(&record.metadata)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn upsert_credibility(
        &self,
        record: &CredibilityRecord,
        source_name: &str,
    ) -> Result<()> {
        let metadata = serde_json::json!({ "source": record.source });
        sqlx::query(
            r#"
            INSERT INTO verified_sources (
                domain, source_name, credibility_score, verification_status,
                last_checked, details, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (domain)
            DO UPDATE SET
                source_name = EXCLUDED.source_name,
                credibility_score = EXCLUDED.credibility_score,
                verification_status = EXCLUDED.verification_status,
                last_checked = EXCLUDED.last_checked,
                details = EXCLUDED.details,
                metadata = EXCLUDED.metadata
            "#,
        )
        .bind(&record.domain)
        .bind(source_name)
        .bind(record.score)
        .bind(record.status.as_str())
        .bind(record.last_checked)
        .bind(details_for(record))
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stats(&self, window_days: i64) -> Result<VerificationStats> {
        let days = window_days.max(0) as i32;

        let status_rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM content_verification
            WHERE created_at >= NOW() - make_interval(days => $1)
            GROUP BY status
            "#,
        )
        .bind(days)
        .fetch_all(&self.pool)
        .await?;

        let mut by_status = HashMap::new();
        let mut total_records = 0;
        for row in status_rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            total_records += count;
            by_status.insert(status, count);
        }

        let retraction_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count,
                   COALESCE(AVG(retraction_confidence), 0) AS avg_confidence
            FROM content_verification
            WHERE created_at >= NOW() - make_interval(days => $1)
              AND retraction_detected
            "#,
        )
        .bind(days)
        .fetch_one(&self.pool)
        .await?;

        let domain_rows = sqlx::query(
            r#"
            SELECT publisher_info->>'domain' AS domain, COUNT(*) AS issue_count
            FROM content_verification
            WHERE created_at >= NOW() - make_interval(days => $1)
              AND status IN ('error', 'retracted', 'warning')
              AND publisher_info->>'domain' IS NOT NULL
            GROUP BY publisher_info->>'domain'
            HAVING COUNT(*) > $2
            ORDER BY COUNT(*) DESC
            "#,
        )
        .bind(days)
        .bind(DOMAIN_ISSUE_THRESHOLD)
        .fetch_all(&self.pool)
        .await?;

        let flagged_domains = domain_rows
            .into_iter()
            .map(|row| FlaggedDomain {
                domain: row.get("domain"),
                issue_count: row.get("issue_count"),
            })
            .collect();

        Ok(VerificationStats {
            total_records,
            by_status,
            retractions_detected: retraction_row.get("count"),
            avg_retraction_confidence: retraction_row.get("avg_confidence"),
            flagged_domains,
        })
    }
}

fn details_for(record: &CredibilityRecord) -> &'static str {
    match record.source {
        CredibilitySource::Whitelist => "whitelisted source",
        CredibilitySource::Calculated => "score calculated from domain heuristics",
    }
}

/// In-memory store for tests and database-less runs.
pub struct MemoryVerificationStore {
    clock: Arc<dyn Clock>,
    records: RwLock<Vec<VerificationRecord>>,
    sources: RwLock<HashMap<String, (CredibilityRecord, String)>>,
}

impl MemoryVerificationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: RwLock::new(Vec::new()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    pub async fn records(&self) -> Vec<VerificationRecord> {
        self.records.read().await.clone()
    }

    pub async fn source(&self, domain: &str) -> Option<CredibilityRecord> {
        self.sources
            .read()
            .await
            .get(domain)
            .map(|(record, _)| record.clone())
    }

    pub async fn source_name(&self, domain: &str) -> Option<String> {
        self.sources
            .read()
            .await
            .get(domain)
            .map(|(_, name)| name.clone())
    }
}

#[async_trait]
impl VerificationStore for MemoryVerificationStore {
    async fn record(&self, record: &VerificationRecord) -> Result<i64> {
        let mut records = self.records.write().await;
        records.push(record.clone());
        Ok(records.len() as i64)
    }

    async fn upsert_credibility(
        &self,
        record: &CredibilityRecord,
        source_name: &str,
    ) -> Result<()> {
        let mut sources = self.sources.write().await;
        sources.insert(
            record.domain.clone(),
            (record.clone(), source_name.to_string()),
        );
        Ok(())
    }

    async fn stats(&self, window_days: i64) -> Result<VerificationStats> {
        let cutoff = self.clock.now() - chrono::Duration::days(window_days);
        let records = self.records.read().await;
        let recent: Vec<&VerificationRecord> =
            records.iter().filter(|r| r.created_at >= cutoff).collect();

        let mut by_status: HashMap<String, i64> = HashMap::new();
        for record in &recent {
            *by_status
                .entry(record.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        let retracted: Vec<&&VerificationRecord> =
            recent.iter().filter(|r| r.retraction_detected).collect();
        let avg_retraction_confidence = if retracted.is_empty() {
            0.0
        } else {
            retracted
                .iter()
                .map(|r| r.retraction_confidence)
                .sum::<f64>()
                / retracted.len() as f64
        };

        let mut issue_counts: HashMap<String, i64> = HashMap::new();
        for record in &recent {
            let problematic = matches!(
                record.status,
                VerificationStatus::Error
                    | VerificationStatus::Retracted
                    | VerificationStatus::Warning
            );
            if !problematic {
                continue;
            }
            if let Some(domain) = record.publisher_info.get("domain").and_then(|d| d.as_str()) {
                *issue_counts.entry(domain.to_string()).or_insert(0) += 1;
            }
        }
        let mut flagged_domains: Vec<FlaggedDomain> = issue_counts
            .into_iter()
            .filter(|(_, count)| *count > DOMAIN_ISSUE_THRESHOLD)
            .map(|(domain, issue_count)| FlaggedDomain {
                domain,
                issue_count,
            })
            .collect();
        flagged_domains.sort_by(|a, b| b.issue_count.cmp(&a.issue_count));

        Ok(VerificationStats {
            total_records: recent.len() as i64,
            by_status,
            retractions_detected: retracted.len() as i64,
            avg_retraction_confidence,
            flagged_domains,
        })
    }
}
