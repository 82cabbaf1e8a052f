//! `inference_cache` table
//!
//! Rows are write-once: `put` uses `INSERT OR IGNORE`, so the first response
//! stored for `(image_id, model_name, model_version)` is the one every later
//! reader sees.

use chrono::Utc;
use sift_common::Result;
use sqlx::SqlitePool;

use super::format_timestamp;

pub async fn get(
    pool: &SqlitePool,
    image_id: &str,
    model_name: &str,
    model_version: &str,
) -> Result<Option<String>> {
    let response = sqlx::query_scalar(
        r#"
        SELECT raw_response FROM inference_cache
        WHERE image_id = ? AND model_name = ? AND model_version = ?
        "#,
    )
    .bind(image_id)
    .bind(model_name)
    .bind(model_version)
    .fetch_optional(pool)
    .await?;

    Ok(response)
}

/// Store a response unless one is already cached; returns whether it was inserted
pub async fn put(
    pool: &SqlitePool,
    image_id: &str,
    model_name: &str,
    model_version: &str,
    raw_response: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO inference_cache (image_id, model_name, model_version, raw_response, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(image_id)
    .bind(model_name)
    .bind(model_version)
    .bind(raw_response)
    .bind(format_timestamp(&Utc::now()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Remove every cached response; returns rows removed
pub async fn clear_all(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM inference_cache").execute(pool).await?;
    Ok(result.rows_affected())
}

/// Remove every cached response for one image or grid
pub async fn invalidate_image(pool: &SqlitePool, image_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM inference_cache WHERE image_id = ?")
        .bind(image_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
