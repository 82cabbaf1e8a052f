//! Grid records and the per-grid result transaction

use sift_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::{GridStatus, Pass, TriageGridRecord};
use crate::utils::retry_on_lock;

/// Insert a grid row, resetting it to pending if it already exists
pub async fn upsert_grid(pool: &SqlitePool, grid: &TriageGridRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO triage_grids (
            job_id, pass, grid_index, dimension, cell_size_px, composite_path,
            status, models_succeeded, models_failed, error_message
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id, pass, grid_index) DO UPDATE SET
            dimension = excluded.dimension,
            cell_size_px = excluded.cell_size_px,
            composite_path = excluded.composite_path,
            status = excluded.status,
            models_succeeded = excluded.models_succeeded,
            models_failed = excluded.models_failed,
            error_message = excluded.error_message
        "#,
    )
    .bind(grid.job_id.to_string())
    .bind(grid.pass.as_str())
    .bind(grid.grid_index as i64)
    .bind(grid.dimension as i64)
    .bind(grid.cell_size_px as i64)
    .bind(grid.composite_path.to_string_lossy().as_ref())
    .bind(grid.status.as_str())
    .bind(grid.models_succeeded as i64)
    .bind(grid.models_failed as i64)
    .bind(&grid.error_message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Grids of one pass ordered by index
pub async fn load_pass_grids(
    pool: &SqlitePool,
    job_id: Uuid,
    pass: Pass,
) -> Result<Vec<TriageGridRecord>> {
    sqlx::query(
        r#"
        SELECT job_id, pass, grid_index, dimension, cell_size_px, composite_path,
               status, models_succeeded, models_failed, error_message
        FROM triage_grids
        WHERE job_id = ? AND pass = ?
        ORDER BY grid_index
        "#,
    )
    .bind(job_id.to_string())
    .bind(pass.as_str())
    .fetch_all(pool)
    .await?
    .iter()
    .map(grid_from_row)
    .collect()
}

pub async fn delete_pass_grids(pool: &SqlitePool, job_id: Uuid, pass: Pass) -> Result<u64> {
    let result = sqlx::query("DELETE FROM triage_grids WHERE job_id = ? AND pass = ?")
        .bind(job_id.to_string())
        .bind(pass.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Outcome of running the selector on one grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridResult {
    pub pass: Pass,
    pub grid_index: u32,
    /// `(sequence, votes)` of every selected photo
    pub selected: Vec<(u32, u32)>,
    /// Photos of a grid whose models all failed
    pub failed_sequences: Vec<u32>,
    /// `Some` marks the grid failed
    pub error_message: Option<String>,
    pub models_succeeded: u32,
    pub models_failed: u32,
    pub api_calls: u64,
    pub credits: f64,
}

impl GridResult {
    pub fn is_failed(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Apply one grid's outcome atomically
///
/// Photo flags, grid status and job counters change in a single transaction,
/// so a crash never leaves a grid half-applied.
pub async fn apply_grid_result(
    pool: &SqlitePool,
    job_id: Uuid,
    result: &GridResult,
    max_wait_ms: u64,
) -> Result<()> {
    retry_on_lock("apply_grid_result", max_wait_ms, || {
        apply_grid_result_once(pool, job_id, result)
    })
    .await
}

async fn apply_grid_result_once(pool: &SqlitePool, job_id: Uuid, result: &GridResult) -> Result<()> {
    let job_id_str = job_id.to_string();
    let mut tx = pool.begin().await?;

    let select_sql = match result.pass {
        Pass::Coarse => {
            "UPDATE triage_photos SET selected_coarse = 1, coarse_votes = ? WHERE job_id = ? AND sequence = ?"
        }
        Pass::Fine => {
            "UPDATE triage_photos SET selected_fine = 1, fine_votes = ? WHERE job_id = ? AND sequence = ?"
        }
    };
    for (sequence, votes) in &result.selected {
        sqlx::query(select_sql)
            .bind(*votes as i64)
            .bind(&job_id_str)
            .bind(*sequence as i64)
            .execute(&mut *tx)
            .await?;
    }

    let mut newly_excluded = 0u64;
    if let Some(reason) = &result.error_message {
        let reason = format!("{} grid {} failed: {}", result.pass, result.grid_index, reason);
        for sequence in &result.failed_sequences {
            newly_excluded += sqlx::query(
                r#"
                UPDATE triage_photos SET excluded = 1, exclusion_reason = ?
                WHERE job_id = ? AND sequence = ? AND excluded = 0
                "#,
            )
            .bind(&reason)
            .bind(&job_id_str)
            .bind(*sequence as i64)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
    }

    let grid_status = if result.is_failed() {
        GridStatus::Failed
    } else {
        GridStatus::Completed
    };
    sqlx::query(
        r#"
        UPDATE triage_grids
        SET status = ?, models_succeeded = ?, models_failed = ?, error_message = ?
        WHERE job_id = ? AND pass = ? AND grid_index = ?
        "#,
    )
    .bind(grid_status.as_str())
    .bind(result.models_succeeded as i64)
    .bind(result.models_failed as i64)
    .bind(&result.error_message)
    .bind(&job_id_str)
    .bind(result.pass.as_str())
    .bind(result.grid_index as i64)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE triage_jobs SET
            grids_processed = grids_processed + 1,
            grids_failed = grids_failed + ?,
            photos_excluded = photos_excluded + ?,
            current_step = current_step + 1,
            api_calls = api_calls + ?,
            credits_deducted = credits_deducted + ?
        WHERE job_id = ?
        "#,
    )
    .bind(i64::from(result.is_failed()))
    .bind(newly_excluded as i64)
    .bind(result.api_calls as i64)
    .bind(result.credits)
    .bind(&job_id_str)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

fn grid_from_row(row: &SqliteRow) -> Result<TriageGridRecord> {
    let job_id: String = row.get("job_id");
    let pass: String = row.get("pass");
    let status: String = row.get("status");
    let composite_path: String = row.get("composite_path");

    Ok(TriageGridRecord {
        job_id: Uuid::parse_str(&job_id)
            .map_err(|e| Error::Internal(format!("Invalid job id {}: {}", job_id, e)))?,
        pass: pass.parse().map_err(Error::Internal)?,
        grid_index: row.get::<i64, _>("grid_index") as u32,
        dimension: row.get::<i64, _>("dimension") as u32,
        cell_size_px: row.get::<i64, _>("cell_size_px") as u32,
        composite_path: PathBuf::from(composite_path),
        status: status.parse().map_err(Error::Internal)?,
        models_succeeded: row.get::<i64, _>("models_succeeded") as u32,
        models_failed: row.get::<i64, _>("models_failed") as u32,
        error_message: row.get("error_message"),
    })
}
