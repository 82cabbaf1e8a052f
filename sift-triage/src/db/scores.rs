//! Composite scores of final selections

use chrono::Utc;
use sift_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use super::format_timestamp;
use crate::services::composite_scorer::ScoreResult;

/// Store (or replace) the score of one photo in a job
pub async fn save_score(
    pool: &SqlitePool,
    job_id: Uuid,
    content_hash: &str,
    score: &ScoreResult,
) -> Result<()> {
    let attributes = serde_json::to_string(&score.attributes)
        .map_err(|e| Error::Internal(format!("Failed to serialize attributes: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO photo_scores (
            job_id, content_hash, aesthetic_score, technical_score, final_score,
            attributes, explanation, scored_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id, content_hash) DO UPDATE SET
            aesthetic_score = excluded.aesthetic_score,
            technical_score = excluded.technical_score,
            final_score = excluded.final_score,
            attributes = excluded.attributes,
            explanation = excluded.explanation,
            scored_at = excluded.scored_at
        "#,
    )
    .bind(job_id.to_string())
    .bind(content_hash)
    .bind(score.aesthetic_score)
    .bind(score.technical_score)
    .bind(score.final_score)
    .bind(&attributes)
    .bind(&score.explanation)
    .bind(format_timestamp(&Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Scores of a job keyed by content hash
pub async fn load_scores_for_job(
    pool: &SqlitePool,
    job_id: Uuid,
) -> Result<HashMap<String, ScoreResult>> {
    let rows = sqlx::query(
        r#"
        SELECT content_hash, aesthetic_score, technical_score, final_score, attributes, explanation
        FROM photo_scores WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let attributes: String = row.get("attributes");
            let attributes = serde_json::from_str(&attributes)
                .map_err(|e| Error::Internal(format!("Invalid stored attributes: {}", e)))?;
            Ok((
                row.get("content_hash"),
                ScoreResult {
                    aesthetic_score: row.get("aesthetic_score"),
                    technical_score: row.get("technical_score"),
                    final_score: row.get("final_score"),
                    attributes,
                    explanation: row.get("explanation"),
                },
            ))
        })
        .collect()
}
