use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use feed_verifier::{
    Clock, CredibilityRecord, CredibilitySource, CredibilityStatus, ManualClock,
    MemoryVerificationStore, PgVerificationStore, Result, VerificationRecord, VerificationStatus,
    VerificationStore,
};
use tracing::info;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

fn record(
    domain: &str,
    status: VerificationStatus,
    retraction_confidence: f64,
    created_at: DateTime<Utc>,
) -> VerificationRecord {
    VerificationRecord {
        post_id: None,
        rss_item_hash: format!("{:0>64}", domain.len()),
        original_url: format!("https://{}/stories/example", domain),
        status,
        retraction_detected: retraction_confidence > 0.4,
        retraction_confidence,
        source_legitimate: status != VerificationStatus::Error,
        content_accessible: Some(status != VerificationStatus::Error),
        publisher_info: serde_json::json!({ "domain": domain }),
        metadata: serde_json::json!({}),
        created_at,
    }
}

fn credibility(domain: &str, score: f64, now: DateTime<Utc>) -> CredibilityRecord {
    CredibilityRecord {
        domain: domain.to_string(),
        score,
        status: CredibilityStatus::Reliable,
        source: CredibilitySource::Calculated,
        last_checked: now,
    }
}

#[tokio::test]
async fn test_memory_store_appends_audit_rows() -> Result<()> {
    init_tracing();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
    ));
    let store = MemoryVerificationStore::new(clock.clone());

    let first = store
        .record(&record("example.com", VerificationStatus::Verified, 0.0, clock.now()))
        .await?;
    let second = store
        .record(&record("example.org", VerificationStatus::Retracted, 0.8, clock.now()))
        .await?;
    assert!(second > first, "ids should grow with each append");

    let rows = store.records().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, VerificationStatus::Verified);
    assert_eq!(rows[1].status, VerificationStatus::Retracted);
    assert!(rows[1].retraction_detected);
    Ok(())
}

#[tokio::test]
async fn test_memory_store_upsert_latest_wins() -> Result<()> {
    init_tracing();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
    ));
    let store = MemoryVerificationStore::new(clock.clone());

    store
        .upsert_credibility(&credibility("example.com", 62.0, clock.now()), "Example Wire")
        .await?;
    clock.advance(Duration::hours(1));
    store
        .upsert_credibility(&credibility("example.com", 71.0, clock.now()), "Example Newsroom")
        .await?;

    let stored = store
        .source("example.com")
        .await
        .expect("the domain should exist after two upserts");
    assert_eq!(stored.score, 71.0, "the later write must win");
    assert_eq!(
        store.source_name("example.com").await.as_deref(),
        Some("Example Newsroom")
    );
    Ok(())
}

#[tokio::test]
async fn test_memory_store_stats_window() -> Result<()> {
    init_tracing();
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(now));
    let store = MemoryVerificationStore::new(clock.clone());

    // Inside the 7-day window: three verified, one retracted pair, and a
    // shady domain with enough problem rows to get flagged.
    for _ in 0..3 {
        store
            .record(&record("example.com", VerificationStatus::Verified, 0.0, now))
            .await?;
    }
    store
        .record(&record("example.org", VerificationStatus::Retracted, 0.8, now))
        .await?;
    store
        .record(&record("example.org", VerificationStatus::Retracted, 0.4001, now))
        .await?;
    for _ in 0..6 {
        store
            .record(&record("shady.tk", VerificationStatus::Error, 0.0, now))
            .await?;
    }
    // Outside the window; must not count.
    store
        .record(&record(
            "example.com",
            VerificationStatus::Error,
            0.0,
            now - Duration::days(30),
        ))
        .await?;

    let stats = store.stats(7).await?;
    info!("Stats: {:?}", stats);

    assert_eq!(stats.total_records, 11, "the 30-day-old row is out of window");
    assert_eq!(stats.by_status.get("verified"), Some(&3));
    assert_eq!(stats.by_status.get("retracted"), Some(&2));
    assert_eq!(stats.by_status.get("error"), Some(&6));
    assert_eq!(stats.retractions_detected, 2);
    assert!(
        (stats.avg_retraction_confidence - 0.60005).abs() < 1e-6,
        "avg confidence was {}",
        stats.avg_retraction_confidence
    );

    assert_eq!(stats.flagged_domains.len(), 1, "only shady.tk crosses the threshold");
    assert_eq!(stats.flagged_domains[0].domain, "shady.tk");
    assert_eq!(stats.flagged_domains[0].issue_count, 6);
    Ok(())
}

#[tokio::test]
async fn test_memory_store_stats_empty() -> Result<()> {
    init_tracing();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
    ));
    let store = MemoryVerificationStore::new(clock);

    let stats = store.stats(7).await?;
    assert_eq!(stats.total_records, 0);
    assert_eq!(stats.retractions_detected, 0);
    assert_eq!(stats.avg_retraction_confidence, 0.0);
    assert!(stats.flagged_domains.is_empty());
    Ok(())
}

/// Exercises the real schema and queries. Runs only against a disposable
/// database named by TEST_DATABASE_URL; skipped otherwise.
#[tokio::test]
async fn test_pg_store_round_trip() -> Result<()> {
    init_tracing();
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        info!("TEST_DATABASE_URL not set, skipping Postgres store test");
        return Ok(());
    };

    let store = PgVerificationStore::connect(&database_url).await?;
    store.setup_schema().await?;
    // setup_schema is idempotent.
    store.setup_schema().await?;

    let now = Utc::now();
    let id = store
        .record(&record("example.com", VerificationStatus::Verified, 0.0, now))
        .await?;
    assert!(id > 0);

    store
        .upsert_credibility(&credibility("example.com", 62.0, now), "Example Wire")
        .await?;
    store
        .upsert_credibility(&credibility("example.com", 71.0, now), "Example Newsroom")
        .await?;

    let stats = store.stats(7).await?;
    assert!(stats.total_records >= 1);
    assert!(stats.by_status.contains_key("verified"));
    Ok(())
}
