//! Expired job collection
//!
//! Jobs are retained for `job_ttl_hours` after creation. A periodic task
//! deletes expired rows (photos, grids and scores cascade) together with the
//! job's staging directory. Processing jobs are never collected.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::error::TriageError;
use crate::models::TriageJob;

/// Fail reads of a job that expired but was not yet collected
pub fn ensure_not_expired(job: &TriageJob, now: DateTime<Utc>) -> Result<(), TriageError> {
    if job.is_expired(now) {
        return Err(TriageError::JobExpired(job.job_id));
    }
    Ok(())
}

/// Delete every expired job; returns the ids removed
pub async fn cleanup_expired_jobs(
    db: &SqlitePool,
    jobs_root: &Path,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, TriageError> {
    let mut removed = Vec::new();

    for job_id in db::jobs::list_expired_job_ids(db, now).await? {
        if !db::jobs::delete_expired_job(db, job_id, now).await? {
            continue;
        }

        let staging = jobs_root.join(job_id.to_string());
        if staging.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                tracing::warn!(
                    job_id = %job_id,
                    path = %staging.display(),
                    error = %e,
                    "Failed to remove job staging directory"
                );
            }
        }

        tracing::info!(job_id = %job_id, "Expired triage job removed");
        removed.push(job_id);
    }

    Ok(removed)
}

/// Run [`cleanup_expired_jobs`] every `interval` until `shutdown` fires
pub fn spawn_cleanup_task(
    db: SqlitePool,
    jobs_root: std::path::PathBuf,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Job cleanup task stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match cleanup_expired_jobs(&db, &jobs_root, Utc::now()).await {
                        Ok(removed) if !removed.is_empty() => {
                            tracing::info!(count = removed.len(), "Expired triage jobs collected");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Job cleanup failed"),
                    }
                }
            }
        }
    })
}
