//! Background execution of triage jobs
//!
//! One tokio task per job. The task owns a cancellation token registered in
//! [`AppState::cancellation_tokens`] for as long as it runs, so
//! `POST /triage/cancel` can reach it.

use anyhow::Context;
use chrono::Utc;
use sift_common::events::SiftEvent;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::db::settings::TriageSettings;
use crate::models::JobStatus;
use crate::services::composite_scorer::CompositeScorer;
use crate::services::triage_orchestrator::TriageOrchestrator;
use crate::services::triage_selector::TriageSelector;
use crate::AppState;

/// Spawn the orchestrator task for a persisted job
///
/// The token is registered before the task starts and removed when it ends.
pub async fn spawn_triage_job(state: AppState, job_id: Uuid) -> JoinHandle<()> {
    let cancel_token = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(job_id, cancel_token.clone());

    tokio::spawn(async move {
        let result = execute_triage_job(&state, job_id, cancel_token).await;

        state.cancellation_tokens.write().await.remove(&job_id);

        match result {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "Triage task finished");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Triage task failed");
                *state.last_error.write().await = Some(format!("Job {}: {:#}", job_id, e));
            }
        }
    })
}

async fn execute_triage_job(
    state: &AppState,
    job_id: Uuid,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    let orchestrator = match build_orchestrator(state, job_id).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            mark_failed(state, job_id, &format!("{:#}", e)).await;
            return Err(e);
        }
    };

    // run_job records its own failure on the job row
    let outcome = orchestrator
        .run_job(job_id, cancel_token)
        .await
        .with_context(|| format!("Triage job {} did not complete", job_id))?;

    tracing::info!(
        job_id = %job_id,
        status = %outcome.job.status,
        final_selected = outcome.selection.len(),
        api_calls = outcome.job.api_calls,
        "Triage job outcome"
    );
    Ok(())
}

/// Wire the orchestrator for one job from the current settings
async fn build_orchestrator(state: &AppState, job_id: Uuid) -> anyhow::Result<TriageOrchestrator> {
    let settings = TriageSettings::load(&state.db)
        .await
        .context("Invalid triage settings")?;

    let model = state
        .vision_model
        .clone()
        .context("Vision model not configured (set SIFT_VISION_API_KEY)")?;

    let job = db::jobs::require_job(&state.db, job_id).await?;

    let scorer = match (&settings.scorer_config, job.score_selected) {
        (Some(config), true) => Some(Arc::new(CompositeScorer::new(
            config.clone(),
            model.clone(),
            Some(state.inference_cache.clone()),
            settings.model_call_timeout(),
        )?)),
        (None, true) => {
            tracing::warn!(job_id = %job_id, "Scoring requested but no scorer_config is set");
            None
        }
        _ => None,
    };

    let selector = TriageSelector::new(
        model,
        Some(state.inference_cache.clone()),
        settings.model_call_timeout(),
    );

    Ok(TriageOrchestrator::new(
        state.db.clone(),
        state.event_bus.clone(),
        selector,
        settings,
        state.jobs_root.clone(),
    )
    .with_scorer(scorer))
}

/// Fail a job that never reached the orchestrator
async fn mark_failed(state: &AppState, job_id: Uuid, message: &str) {
    let mut job = match db::jobs::require_job(&state.db, job_id).await {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load job - cannot mark as failed");
            return;
        }
    };

    if job.is_terminal() {
        return;
    }

    let applied = match job.fail(message) {
        Ok(transition) => db::jobs::apply_transition(&state.db, &job, &transition)
            .await
            .unwrap_or(false),
        Err(_) => false,
    };

    if !applied {
        tracing::error!(
            job_id = %job_id,
            "Failed to mark job as failed - attempting direct database update"
        );

        // Fallback: direct update so the job never stays non-terminal
        let _ = sqlx::query(
            r#"UPDATE triage_jobs
               SET status = 'failed', completed_at = ?, error_message = ?
               WHERE job_id = ? AND status NOT IN ('completed', 'failed', 'cancelled')"#,
        )
        .bind(db::format_timestamp(&Utc::now()))
        .bind(message)
        .bind(job_id.to_string())
        .execute(&state.db)
        .await;
    }

    state.event_bus.emit_lossy(SiftEvent::TriageJobFailed {
        job_id,
        error_message: message.to_string(),
        grids_processed: job.grids_processed,
        timestamp: Utc::now(),
    });
}

/// Pick up jobs left non-terminal by a previous process
///
/// Jobs still ingesting whose source files have disappeared cannot be
/// redone and are cancelled; every other job is resumed from its persisted
/// phase. Returns the number of jobs resumed.
pub async fn resume_interrupted_jobs(state: &AppState) -> anyhow::Result<usize> {
    let interrupted = db::jobs::list_jobs_with_status(
        &state.db,
        &[JobStatus::Pending, JobStatus::Uploading, JobStatus::Processing],
    )
    .await
    .context("Failed to list interrupted jobs")?;

    let mut resumed = 0;
    for mut job in interrupted {
        let ingesting = matches!(job.status, JobStatus::Pending | JobStatus::Uploading);
        if ingesting && !job.source_paths.iter().any(|p| p.exists()) {
            tracing::warn!(job_id = %job.job_id, "Source photos missing - cancelling interrupted job");
            let transition = job.cancel()?;
            if db::jobs::apply_transition(&state.db, &job, &transition).await? {
                state.event_bus.emit_lossy(SiftEvent::TriageJobCancelled {
                    job_id: job.job_id,
                    grids_processed: job.grids_processed,
                    timestamp: Utc::now(),
                });
            }
            continue;
        }

        tracing::info!(
            job_id = %job.job_id,
            status = %job.status,
            phase = %job.phase,
            "Resuming interrupted triage job"
        );
        spawn_triage_job(state.clone(), job.job_id).await;
        resumed += 1;
    }

    Ok(resumed)
}
