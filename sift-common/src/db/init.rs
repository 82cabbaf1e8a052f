//! Database initialization
//!
//! Opens (or creates) the SQLite database inside the root folder and applies the
//! connection pragmas every PhotoSift service relies on.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

/// Initialize database connection pool, creating the file if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    apply_pragmas(&pool).await?;
    create_settings_table(&pool).await?;

    Ok(pool)
}

/// Foreign keys (job deletion cascades), WAL for concurrent grid writers, busy timeout
pub async fn apply_pragmas(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores configuration key-value pairs (tunables, API keys).
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a setting with its default value unless it already exists
///
/// NULL values are reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE handles concurrent initialization
    let inserted = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        debug!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let reset = sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND value IS NULL")
        .bind(default_value)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    if reset > 0 {
        info!("Reset NULL setting '{}' to default value: {}", key, default_value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_settings_table(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_ensure_setting_does_not_overwrite() {
        let pool = memory_pool().await;

        ensure_setting(&pool, "grid_parallelism", "4").await.unwrap();
        sqlx::query("UPDATE settings SET value = '8' WHERE key = 'grid_parallelism'")
            .execute(&pool)
            .await
            .unwrap();
        ensure_setting(&pool, "grid_parallelism", "4").await.unwrap();

        let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'grid_parallelism'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, "8");
    }

    #[tokio::test]
    async fn test_ensure_setting_resets_null() {
        let pool = memory_pool().await;

        sqlx::query("INSERT INTO settings (key, value) VALUES ('jpeg_quality', NULL)")
            .execute(&pool)
            .await
            .unwrap();
        ensure_setting(&pool, "jpeg_quality", "85").await.unwrap();

        let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'jpeg_quality'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, "85");
    }
}
