//! Triage job persistence
//!
//! Status and phase only change through [`apply_transition`], a
//! compare-and-swap on the previous status/phase. Counters are incremented
//! in place by the grid transactions in `db::grids`.

use chrono::{DateTime, Utc};
use sift_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::path::PathBuf;
use uuid::Uuid;

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::models::{JobStatus, StateTransition, TriageJob};
use crate::utils::retry_on_lock;

const JOB_COLUMNS: &str = r#"
    job_id, status, phase, target, criteria, passes, source_paths, score_selected,
    current_step, total_steps, total_input, pass1_survivors, final_selected,
    grids_processed, grids_failed, photos_excluded, api_calls, credits_deducted,
    max_api_calls, error_message, created_at, started_at, completed_at, expires_at
"#;

/// Insert or fully overwrite a job row
pub async fn save_job(pool: &SqlitePool, job: &TriageJob, max_wait_ms: u64) -> Result<()> {
    // Prepare all data before acquiring a connection
    let job_id = job.job_id.to_string();
    let source_paths = serde_json::to_string(&job.source_paths)
        .map_err(|e| Error::Internal(format!("Failed to serialize source paths: {}", e)))?;
    let created_at = format_timestamp(&job.created_at);
    let started_at = job.started_at.as_ref().map(format_timestamp);
    let completed_at = job.completed_at.as_ref().map(format_timestamp);
    let expires_at = format_timestamp(&job.expires_at);
    let target = job.target.to_string();
    let criteria = job.criteria.to_string();

    retry_on_lock("save_job", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO triage_jobs (
                job_id, status, phase, target, criteria, passes, source_paths, score_selected,
                current_step, total_steps, total_input, pass1_survivors, final_selected,
                grids_processed, grids_failed, photos_excluded, api_calls, credits_deducted,
                max_api_calls, error_message, created_at, started_at, completed_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                phase = excluded.phase,
                current_step = excluded.current_step,
                total_steps = excluded.total_steps,
                total_input = excluded.total_input,
                pass1_survivors = excluded.pass1_survivors,
                final_selected = excluded.final_selected,
                grids_processed = excluded.grids_processed,
                grids_failed = excluded.grids_failed,
                photos_excluded = excluded.photos_excluded,
                api_calls = excluded.api_calls,
                credits_deducted = MAX(credits_deducted, excluded.credits_deducted),
                error_message = excluded.error_message,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&job_id)
        .bind(job.status.as_str())
        .bind(job.phase.as_str())
        .bind(&target)
        .bind(&criteria)
        .bind(job.passes as i64)
        .bind(&source_paths)
        .bind(job.score_selected)
        .bind(job.current_step as i64)
        .bind(job.total_steps as i64)
        .bind(job.total_input as i64)
        .bind(job.pass1_survivors as i64)
        .bind(job.final_selected as i64)
        .bind(job.grids_processed as i64)
        .bind(job.grids_failed as i64)
        .bind(job.photos_excluded as i64)
        .bind(job.api_calls as i64)
        .bind(job.credits_deducted)
        .bind(job.max_api_calls.map(|v| v as i64))
        .bind(&job.error_message)
        .bind(&created_at)
        .bind(&started_at)
        .bind(&completed_at)
        .bind(&expires_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Load a job by id
pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<TriageJob>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM triage_jobs WHERE job_id = ?",
        JOB_COLUMNS
    ))
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| job_from_row(&r)).transpose()
}

/// Load a job or fail with `NotFound`
pub async fn require_job(pool: &SqlitePool, job_id: Uuid) -> Result<TriageJob> {
    load_job(pool, job_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Triage job not found: {}", job_id)))
}

/// Jobs in any of `statuses`, oldest first
pub async fn list_jobs_with_status(
    pool: &SqlitePool,
    statuses: &[JobStatus],
) -> Result<Vec<TriageJob>> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM triage_jobs WHERE status IN ({}) ORDER BY created_at",
        JOB_COLUMNS, placeholders
    );
    let mut query = sqlx::query(&sql);
    for status in statuses {
        query = query.bind(status.as_str());
    }

    query
        .fetch_all(pool)
        .await?
        .iter()
        .map(job_from_row)
        .collect()
}

/// Compare-and-swap status/phase update
///
/// Returns `false` when the row no longer has the transition's old
/// status/phase (a concurrent writer won).
pub async fn apply_transition(
    pool: &SqlitePool,
    job: &TriageJob,
    transition: &StateTransition,
) -> Result<bool> {
    let started_at = job.started_at.as_ref().map(format_timestamp);
    let completed_at = job.completed_at.as_ref().map(format_timestamp);

    let result = sqlx::query(
        r#"
        UPDATE triage_jobs
        SET status = ?, phase = ?, started_at = ?, completed_at = ?, error_message = ?
        WHERE job_id = ? AND status = ? AND phase = ?
        "#,
    )
    .bind(transition.new_status.as_str())
    .bind(transition.new_phase.as_str())
    .bind(&started_at)
    .bind(&completed_at)
    .bind(&job.error_message)
    .bind(transition.job_id.to_string())
    .bind(transition.old_status.as_str())
    .bind(transition.old_phase.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record ingest totals
pub async fn set_total_input(pool: &SqlitePool, job_id: Uuid, total_input: u64) -> Result<()> {
    sqlx::query("UPDATE triage_jobs SET total_input = ? WHERE job_id = ?")
        .bind(total_input as i64)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Grids known so far across all passes
pub async fn set_total_steps(pool: &SqlitePool, job_id: Uuid, total_steps: u64) -> Result<()> {
    sqlx::query("UPDATE triage_jobs SET total_steps = ? WHERE job_id = ?")
        .bind(total_steps as i64)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_pass1_survivors(pool: &SqlitePool, job_id: Uuid, survivors: u64) -> Result<()> {
    sqlx::query("UPDATE triage_jobs SET pass1_survivors = ? WHERE job_id = ?")
        .bind(survivors as i64)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Ids of jobs past `expires_at` that are not processing
pub async fn list_expired_job_ids(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT job_id FROM triage_jobs WHERE expires_at < ? AND status != 'processing'",
    )
    .bind(format_timestamp(&now))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|id| {
            Uuid::parse_str(id).map_err(|e| Error::Internal(format!("Invalid job id {}: {}", id, e)))
        })
        .collect()
}

/// Delete a job if it is still expired; cascades to photos, grids and scores
pub async fn delete_expired_job(pool: &SqlitePool, job_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM triage_jobs WHERE job_id = ? AND expires_at < ? AND status != 'processing'",
    )
    .bind(job_id.to_string())
    .bind(format_timestamp(&now))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn job_from_row(row: &SqliteRow) -> Result<TriageJob> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Invalid job id {}: {}", job_id, e)))?;

    let status: String = row.get("status");
    let phase: String = row.get("phase");
    let target: String = row.get("target");
    let criteria: String = row.get("criteria");
    let source_paths: String = row.get("source_paths");
    let source_paths: Vec<PathBuf> = serde_json::from_str(&source_paths)
        .map_err(|e| Error::Internal(format!("Failed to deserialize source paths: {}", e)))?;

    let created_at: String = row.get("created_at");
    let expires_at: String = row.get("expires_at");

    Ok(TriageJob {
        job_id,
        status: status.parse().map_err(Error::Internal)?,
        phase: phase.parse().map_err(Error::Internal)?,
        target: target.parse().map_err(Error::Internal)?,
        criteria: criteria.parse().map_err(Error::Internal)?,
        passes: row.get::<i64, _>("passes") as u8,
        source_paths,
        score_selected: row.get("score_selected"),
        current_step: row.get::<i64, _>("current_step") as u64,
        total_steps: row.get::<i64, _>("total_steps") as u64,
        total_input: row.get::<i64, _>("total_input") as u64,
        pass1_survivors: row.get::<i64, _>("pass1_survivors") as u64,
        final_selected: row.get::<i64, _>("final_selected") as u64,
        grids_processed: row.get::<i64, _>("grids_processed") as u64,
        grids_failed: row.get::<i64, _>("grids_failed") as u64,
        photos_excluded: row.get::<i64, _>("photos_excluded") as u64,
        api_calls: row.get::<i64, _>("api_calls") as u64,
        credits_deducted: row.get("credits_deducted"),
        max_api_calls: row.get::<Option<i64>, _>("max_api_calls").map(|v| v as u64),
        error_message: row.get("error_message"),
        created_at: parse_timestamp("created_at", &created_at)?,
        started_at: parse_optional_timestamp("started_at", row.get("started_at"))?,
        completed_at: parse_optional_timestamp("completed_at", row.get("completed_at"))?,
        expires_at: parse_timestamp("expires_at", &expires_at)?,
    })
}
