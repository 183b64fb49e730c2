//! Database migrations.

use crate::error::{MetrixError, Result};
use crate::types::POLL_COUNT;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, instrument};

const SCHEMA_VERSION: i64 = 1;

/// Bring the schema up to date. Safe to run on every start.
#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;

    let current_version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;

    let current_version = current_version.unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    let mut tx =
        pool.begin().await.map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;

    if current_version < 1 {
        migrate_to_v1(&mut tx).await?;
    }

    tx.commit().await.map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;
    Ok(())
}

/// Migration to schema version 1: metric tables and the seeded `PollCount` row.
async fn migrate_to_v1(conn: &mut SqliteConnection) -> Result<()> {
    info!("Running migration to schema version 1");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gauges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            value REAL NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            value INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;

    let now =
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    sqlx::query(
        r#"
        INSERT INTO counters (name, value, created_at, updated_at)
        VALUES (?, 0, ?, ?)
        ON CONFLICT(name) DO NOTHING
        "#,
    )
    .bind(POLL_COUNT)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;

    // Update schema version
    sqlx::query("DELETE FROM schema_version")
        .execute(&mut *conn)
        .await
        .map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(1i64)
        .execute(&mut *conn)
        .await
        .map_err(|e| MetrixError::MigrationFailed { reason: e.to_string() })?;

    info!("Migration to schema version 1 complete");
    Ok(())
}
