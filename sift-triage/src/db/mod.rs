//! Database access for sift-triage
//!
//! Tables: `triage_jobs`, `triage_photos`, `triage_grids`, `inference_cache`,
//! `photo_scores` and the shared `settings` table.

pub mod cache;
pub mod grids;
pub mod jobs;
pub mod photos;
pub mod scores;
pub mod settings;

use chrono::{DateTime, SecondsFormat, Utc};
use sift_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) the database and bring the schema up to date
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = sift_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    settings::seed_default_settings(&pool).await?;
    Ok(pool)
}

/// Create the triage tables if they don't exist
///
/// Photos, grids and scores cascade-delete with their job.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sift_common::db::init::create_settings_table(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triage_jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            phase TEXT NOT NULL,
            target TEXT NOT NULL,
            criteria TEXT NOT NULL,
            passes INTEGER NOT NULL,
            source_paths TEXT NOT NULL DEFAULT '[]',
            score_selected INTEGER NOT NULL DEFAULT 0,
            current_step INTEGER NOT NULL DEFAULT 0,
            total_steps INTEGER NOT NULL DEFAULT 0,
            total_input INTEGER NOT NULL DEFAULT 0,
            pass1_survivors INTEGER NOT NULL DEFAULT 0,
            final_selected INTEGER NOT NULL DEFAULT 0,
            grids_processed INTEGER NOT NULL DEFAULT 0,
            grids_failed INTEGER NOT NULL DEFAULT 0,
            photos_excluded INTEGER NOT NULL DEFAULT 0,
            api_calls INTEGER NOT NULL DEFAULT 0,
            credits_deducted REAL NOT NULL DEFAULT 0.0,
            max_api_calls INTEGER,
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triage_photos (
            job_id TEXT NOT NULL REFERENCES triage_jobs(job_id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            original_filename TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            width INTEGER NOT NULL DEFAULT 0,
            height INTEGER NOT NULL DEFAULT 0,
            grid_index INTEGER,
            grid_coordinate TEXT,
            fine_grid_index INTEGER,
            fine_grid_coordinate TEXT,
            coarse_votes INTEGER NOT NULL DEFAULT 0,
            fine_votes INTEGER NOT NULL DEFAULT 0,
            selected_coarse INTEGER NOT NULL DEFAULT 0,
            selected_fine INTEGER NOT NULL DEFAULT 0,
            final_selected INTEGER NOT NULL DEFAULT 0,
            final_rank INTEGER,
            excluded INTEGER NOT NULL DEFAULT 0,
            exclusion_reason TEXT,
            PRIMARY KEY (job_id, sequence),
            UNIQUE (job_id, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triage_grids (
            job_id TEXT NOT NULL REFERENCES triage_jobs(job_id) ON DELETE CASCADE,
            pass TEXT NOT NULL,
            grid_index INTEGER NOT NULL,
            dimension INTEGER NOT NULL,
            cell_size_px INTEGER NOT NULL,
            composite_path TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            models_succeeded INTEGER NOT NULL DEFAULT 0,
            models_failed INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            PRIMARY KEY (job_id, pass, grid_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inference_cache (
            image_id TEXT NOT NULL,
            model_name TEXT NOT NULL,
            model_version TEXT NOT NULL,
            raw_response TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (image_id, model_name, model_version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS photo_scores (
            job_id TEXT NOT NULL REFERENCES triage_jobs(job_id) ON DELETE CASCADE,
            content_hash TEXT NOT NULL,
            aesthetic_score REAL NOT NULL,
            technical_score REAL NOT NULL,
            final_score REAL NOT NULL,
            attributes TEXT NOT NULL DEFAULT '{}',
            explanation TEXT NOT NULL DEFAULT '',
            scored_at TEXT NOT NULL,
            PRIMARY KEY (job_id, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_triage_jobs_status ON triage_jobs(status)")
        .execute(pool)
        .await?;

    tracing::info!(
        "Database tables initialized (triage_jobs, triage_photos, triage_grids, inference_cache, photo_scores)"
    );

    Ok(())
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so they sort as text
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(field, &v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_roundtrip_keeps_nanoseconds() {
        let now = Utc::now();
        let stored = format_timestamp(&now);
        assert_eq!(parse_timestamp("expires_at", &stored).unwrap(), now);
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let later = earlier + chrono::Duration::nanoseconds(1);
        let (a, b) = (format_timestamp(&earlier), format_timestamp(&later));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
