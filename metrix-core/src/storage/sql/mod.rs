//! Relational backend with SQLite persistence.
//!
//! Each metric is one row in `gauges` or `counters`, keyed by its unique name. Every
//! write runs in a single transaction:
//! 1. upsert the metric row (gauges replace the value, counters add the delta)
//! 2. bump the `PollCount` row
//! 3. commit, or roll back on any failure
//!
//! A batch shares one transaction, so it is applied completely or not at all.

use super::{Pingable, Repository};
use crate::error::{MetrixError, Result};
use crate::retry::Backoff;
use crate::types::{
    checked_total, Counter, Data, Gauge, MetricKind, MetricUpdate, Metrics, POLL_COUNT,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Connection, SqliteConnection};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, instrument};

pub mod migrations;

#[cfg(test)]
mod tests;

const UPSERT_GAUGE: &str = r#"
    INSERT INTO gauges (name, value, created_at, updated_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
    RETURNING value
"#;

const UPSERT_COUNTER: &str = r#"
    INSERT INTO counters (name, value, created_at, updated_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(name) DO UPDATE SET value = counters.value + excluded.value,
                                    updated_at = excluded.updated_at
    RETURNING value
"#;

const BUMP_POLL_COUNT: &str = r#"
    INSERT INTO counters (name, value, created_at, updated_at)
    VALUES (?, 1, ?, ?)
    ON CONFLICT(name) DO UPDATE SET value = counters.value + 1, updated_at = excluded.updated_at
"#;

/// SQL-backed metric repository.
#[derive(Clone)]
pub struct SqlStorage {
    pool: SqlitePool,
}

impl SqlStorage {
    /// Connect with the default retry schedule.
    pub async fn connect(dsn: &str) -> Result<Self> {
        Self::connect_with(dsn, &Backoff::default()).await
    }

    /// Create a SqlStorage with a private in-memory database (for tests).
    pub async fn new_in_memory() -> Result<Self> {
        Self::connect_with("sqlite::memory:", &Backoff::none()).await
    }

    /// Connect to `dsn`, retrying driver failures on `backoff`, and run migrations.
    ///
    /// A malformed DSN fails immediately.
    #[instrument(skip(dsn, backoff))]
    pub async fn connect_with(dsn: &str, backoff: &Backoff) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);
        let in_memory = dsn.contains(":memory:") || dsn.contains("mode=memory");

        let pool = backoff
            .retry(
                "sql_connect",
                || {
                    let options = options.clone();
                    async move {
                        let pool = Self::pool_options(in_memory).connect_with(options).await?;
                        Ok::<_, MetrixError>(pool)
                    }
                },
                MetrixError::is_retriable,
            )
            .await?;

        let storage = Self { pool };
        migrations::run(&storage.pool).await?;

        info!(in_memory, "SQL storage initialized successfully");
        Ok(storage)
    }

    fn pool_options(in_memory: bool) -> SqlitePoolOptions {
        if in_memory {
            // The database lives only as long as a connection to it.
            SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
    }

    /// Get a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Upsert one metric and count it, inside the caller's transaction.
    async fn apply(conn: &mut SqliteConnection, update: MetricUpdate<'_>) -> Result<Metrics> {
        let now = unix_now();
        match update {
            MetricUpdate::Gauge { name, value } => {
                let poll = Self::read_counter(conn, POLL_COUNT).await?;
                checked_total(POLL_COUNT, poll, 1)?;

                let stored: f64 = sqlx::query_scalar(UPSERT_GAUGE)
                    .bind(name)
                    .bind(value)
                    .bind(now)
                    .bind(now)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(db_error("upsert_gauge"))?;
                Self::bump_poll_count(conn, now).await?;
                Ok(Metrics::gauge(name, stored))
            }
            MetricUpdate::Counter { name, delta } => {
                // SQLite turns an overflowing integer sum into REAL, so check first.
                let current = Self::read_counter(conn, name).await?;
                let expected = checked_total(name, current, delta)?;
                let poll = if name == POLL_COUNT {
                    expected
                } else {
                    Self::read_counter(conn, POLL_COUNT).await?
                };
                checked_total(POLL_COUNT, poll, 1)?;

                let mut total: i64 = sqlx::query_scalar(UPSERT_COUNTER)
                    .bind(name)
                    .bind(delta)
                    .bind(now)
                    .bind(now)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(db_error("upsert_counter"))?;
                Self::bump_poll_count(conn, now).await?;
                if name == POLL_COUNT {
                    total += 1;
                }
                Ok(Metrics::counter(name, total))
            }
        }
    }

    /// Current value of a counter inside the caller's transaction, zero if unseen.
    async fn read_counter(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error("read_counter"))?;
        Ok(value.unwrap_or_default())
    }

    async fn bump_poll_count(conn: &mut SqliteConnection, now: i64) -> Result<()> {
        sqlx::query(BUMP_POLL_COUNT)
            .bind(POLL_COUNT)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(db_error("bump_poll_count"))?;
        Ok(())
    }

    /// Apply a single update in its own transaction.
    async fn apply_one(&self, update: MetricUpdate<'_>) -> Result<Metrics> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin"))?;
        let applied = Self::apply(&mut tx, update).await?;
        tx.commit().await.map_err(db_error("commit"))?;
        Ok(applied)
    }
}

#[async_trait]
impl Pingable for SqlStorage {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(db_error("ping"))?;
        conn.ping().await.map_err(db_error("ping"))?;
        Ok(())
    }
}

#[async_trait]
impl Repository for SqlStorage {
    #[instrument(skip(self))]
    async fn update_gauge(&self, name: &str, value: f64) -> Result<Gauge> {
        let applied = self.apply_one(MetricUpdate::Gauge { name, value }).await?;
        Ok(Gauge(applied.value.unwrap_or(value)))
    }

    #[instrument(skip(self))]
    async fn update_counter(&self, name: &str, delta: i64) -> Result<Counter> {
        let applied = self.apply_one(MetricUpdate::Counter { name, delta }).await?;
        Ok(Counter(applied.delta.unwrap_or_default()))
    }

    /// Entries are validated as they are applied; the first bad one rolls back the
    /// whole transaction.
    #[instrument(skip(self, batch), fields(len = batch.len()))]
    async fn update_many(&self, batch: &[Metrics]) -> Result<Vec<Metrics>> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin"))?;
        let mut applied = Vec::with_capacity(batch.len());

        for metric in batch {
            let update = metric.to_update()?;
            applied.push(Self::apply(&mut tx, update).await?);
        }

        tx.commit().await.map_err(db_error("commit"))?;
        Ok(applied)
    }

    #[instrument(skip(self))]
    async fn get_gauge(&self, name: &str) -> Result<Gauge> {
        let value: Option<f64> = sqlx::query_scalar("SELECT value FROM gauges WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get_gauge"))?;

        value.map(Gauge).ok_or_else(|| MetrixError::MetricNotFound {
            kind: MetricKind::Gauge,
            name: name.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn get_counter(&self, name: &str) -> Result<Counter> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get_counter"))?;

        value.map(Counter).ok_or_else(|| MetrixError::MetricNotFound {
            kind: MetricKind::Counter,
            name: name.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<Data> {
        // One read transaction so both tables come from the same point in time.
        let mut tx = self.pool.begin().await.map_err(db_error("begin"))?;

        let gauges: Vec<(String, f64)> = sqlx::query_as("SELECT name, value FROM gauges")
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error("get_all_gauges"))?;
        let counters: Vec<(String, i64)> = sqlx::query_as("SELECT name, value FROM counters")
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error("get_all_counters"))?;

        tx.commit().await.map_err(db_error("commit"))?;

        Ok(Data {
            gauges: gauges.into_iter().map(|(name, v)| (name, Gauge(v))).collect(),
            counters: counters.into_iter().map(|(name, v)| (name, Counter(v))).collect(),
        })
    }

    fn name(&self) -> &'static str {
        "sql"
    }
}

fn db_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> MetrixError {
    move |e| {
        metrics::counter!("metrix_db_errors_total", "operation" => operation).increment(1);
        MetrixError::Database(e)
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or_default()
}
