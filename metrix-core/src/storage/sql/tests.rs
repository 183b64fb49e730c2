use super::*;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_sql_storage_init() {
    let storage = SqlStorage::new_in_memory().await.unwrap();

    // PollCount is seeded by the migration.
    assert_eq!(storage.get_counter(POLL_COUNT).await.unwrap(), Counter(0));
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let storage = SqlStorage::new_in_memory().await.unwrap();
    storage.update_counter("hits", 4).await.unwrap();

    migrations::run(storage.pool()).await.unwrap();
    migrations::run(storage.pool()).await.unwrap();

    assert_eq!(storage.get_counter("hits").await.unwrap(), Counter(4));
    assert_eq!(storage.get_counter(POLL_COUNT).await.unwrap(), Counter(1));
}

#[tokio::test]
async fn test_gauge_upsert() {
    let storage = SqlStorage::new_in_memory().await.unwrap();

    storage.update_gauge("temp", 1.5).await.unwrap();
    let stored = storage.update_gauge("temp", 36.6).await.unwrap();

    assert_eq!(stored, Gauge(36.6));
    assert_eq!(storage.get_gauge("temp").await.unwrap(), Gauge(36.6));
}

#[tokio::test]
async fn test_counter_accumulates() {
    let storage = SqlStorage::new_in_memory().await.unwrap();

    storage.update_counter("hits", 5).await.unwrap();
    let total = storage.update_counter("hits", 5).await.unwrap();

    assert_eq!(total, Counter(10));
    assert_eq!(storage.get_counter("hits").await.unwrap(), Counter(10));
    assert_eq!(storage.get_counter(POLL_COUNT).await.unwrap(), Counter(2));
}

#[tokio::test]
async fn test_updating_poll_count_directly() {
    let storage = SqlStorage::new_in_memory().await.unwrap();

    let total = storage.update_counter(POLL_COUNT, 10).await.unwrap();

    // Ten from the delta, one for the update itself.
    assert_eq!(total, Counter(11));
    assert_eq!(storage.get_counter(POLL_COUNT).await.unwrap(), Counter(11));
}

#[tokio::test]
async fn test_unknown_is_not_found() {
    let storage = SqlStorage::new_in_memory().await.unwrap();

    let err = storage.get_gauge("missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_retriable());

    let err = storage.get_counter("missing").await.unwrap_err();
    assert!(matches!(err, MetrixError::MetricNotFound { kind: MetricKind::Counter, .. }));
}

#[tokio::test]
async fn test_update_many_applies_in_order() {
    let storage = SqlStorage::new_in_memory().await.unwrap();
    let batch = vec![
        Metrics::gauge("temp", 20.0),
        Metrics::counter("hits", 2),
        Metrics::gauge("temp", 21.5),
        Metrics::counter("hits", 3),
    ];

    let applied = storage.update_many(&batch).await.unwrap();

    assert_eq!(
        applied,
        vec![
            Metrics::gauge("temp", 20.0),
            Metrics::counter("hits", 2),
            Metrics::gauge("temp", 21.5),
            Metrics::counter("hits", 5),
        ]
    );
    assert_eq!(storage.get_counter(POLL_COUNT).await.unwrap(), Counter(4));
}

#[tokio::test]
async fn test_update_many_rolls_back_on_bad_entry() {
    let storage = SqlStorage::new_in_memory().await.unwrap();
    let batch = vec![
        Metrics::gauge("a", 1.0),
        Metrics::counter("b", 1),
        Metrics { id: "c".into(), kind: MetricKind::Counter, delta: None, value: Some(2.0) },
        Metrics::gauge("d", 4.0),
        Metrics::counter("e", 5),
    ];

    let err = storage.update_many(&batch).await.unwrap_err();
    assert!(matches!(err, MetrixError::InvalidMetric { .. }));

    let data = storage.get_all().await.unwrap();
    assert!(data.gauges.is_empty());
    assert_eq!(data.counters.len(), 1);
    assert_eq!(data.counters[POLL_COUNT], Counter(0));
}

#[tokio::test]
async fn test_counter_overflow_is_invalid() {
    let storage = SqlStorage::new_in_memory().await.unwrap();
    storage.update_counter("big", i64::MAX).await.unwrap();

    let err = storage.update_counter("big", 1).await.unwrap_err();
    assert!(matches!(err, MetrixError::InvalidMetric { .. }), "{:?}", err);
    assert!(!err.is_retriable());

    let batch = vec![Metrics::gauge("a", 1.0), Metrics::counter("big", 1)];
    assert!(storage.update_many(&batch).await.is_err());

    assert_eq!(storage.get_counter("big").await.unwrap(), Counter(i64::MAX));
    assert!(storage.get_gauge("a").await.unwrap_err().is_not_found());
    assert_eq!(storage.get_counter(POLL_COUNT).await.unwrap(), Counter(1));
}

#[tokio::test]
async fn test_poll_count_overflow_is_invalid() {
    let storage = SqlStorage::new_in_memory().await.unwrap();
    sqlx::query("UPDATE counters SET value = ? WHERE name = ?")
        .bind(i64::MAX)
        .bind(POLL_COUNT)
        .execute(storage.pool())
        .await
        .unwrap();

    let err = storage.update_gauge("temp", 1.0).await.unwrap_err();
    assert!(matches!(err, MetrixError::InvalidMetric { .. }), "{:?}", err);
    assert!(storage.get_gauge("temp").await.unwrap_err().is_not_found());
    assert!(storage.update_counter("hits", 1).await.is_err());
    assert_eq!(storage.get_counter(POLL_COUNT).await.unwrap(), Counter(i64::MAX));
}

#[tokio::test]
async fn test_get_all() {
    let storage = SqlStorage::new_in_memory().await.unwrap();
    storage.update_gauge("temp", 0.1 + 0.2).await.unwrap();
    storage.update_counter("hits", 7).await.unwrap();

    let data = storage.get_all().await.unwrap();

    assert_eq!(data.gauges["temp"], Gauge(0.1 + 0.2));
    assert_eq!(data.counters["hits"], Counter(7));
    assert_eq!(data.counters[POLL_COUNT], Counter(2));
}

#[tokio::test]
async fn test_ping_does_not_mutate() {
    let storage = SqlStorage::new_in_memory().await.unwrap();
    storage.update_gauge("temp", 1.0).await.unwrap();
    let before = storage.get_all().await.unwrap();

    storage.ping().await.unwrap();

    assert_eq!(storage.get_all().await.unwrap(), before);
}

#[tokio::test]
async fn test_concurrent_counter_updates() {
    let storage = Arc::new(SqlStorage::new_in_memory().await.unwrap());
    let mut handles = Vec::new();

    for _ in 0..8 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                storage.update_counter("hits", 1).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(storage.get_counter("hits").await.unwrap(), Counter(200));
    assert_eq!(storage.get_counter(POLL_COUNT).await.unwrap(), Counter(200));
}

#[tokio::test]
async fn test_file_database_persists() {
    let dir = tempdir().unwrap();
    let dsn = format!("sqlite://{}", dir.path().join("metrics.db").display());

    let storage = SqlStorage::connect_with(&dsn, &Backoff::none()).await.unwrap();
    storage.update_counter("hits", 3).await.unwrap();
    storage.close().await;

    let reopened = SqlStorage::connect_with(&dsn, &Backoff::none()).await.unwrap();
    assert_eq!(reopened.get_counter("hits").await.unwrap(), Counter(3));
    assert_eq!(reopened.get_counter(POLL_COUNT).await.unwrap(), Counter(1));
}

#[tokio::test]
async fn test_malformed_dsn_fails_without_retry() {
    let start = std::time::Instant::now();

    let err = SqlStorage::connect("sqlite://metrics.db?bogus=1").await.err().unwrap();

    assert!(!err.is_retriable());
    assert!(start.elapsed() < std::time::Duration::from_secs(1));
}
