//! Triage orchestrator
//!
//! Drives one job through its persisted state machine:
//!
//! PENDING → UPLOADING → PROCESSING{GRID_GENERATION → COARSE_PASS → FINE_PASS} → COMPLETED
//!
//! Each phase lives in its own `phase_*` module and ends with a
//! compare-and-swap transition, so the job row always names the next phase to
//! run. [`TriageOrchestrator::run_job`] re-reads the row before every phase,
//! which makes resuming an interrupted job the same code path as a fresh run.
//! Grids already completed in a pass are skipped on resume.

use chrono::Utc;
use sift_common::events::{EventBus, SiftEvent};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::db::settings::TriageSettings;
use crate::error::{TriageError, TriageResult};
use crate::models::{Criteria, JobPhase, JobStatus, Pass, TriageJob, TriageTarget};
use crate::services::composite_scorer::CompositeScorer;
use crate::services::triage_selector::TriageSelector;

mod phase_grid_generation;
mod phase_ingest;
mod phase_selection;
mod target;

pub use target::{load_outcome, rank_candidates, RankedPhoto, TriageOutcome};

/// Triage orchestrator service
pub struct TriageOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    selector: TriageSelector,
    scorer: Option<Arc<CompositeScorer>>,
    settings: TriageSettings,
    jobs_root: PathBuf,
}

impl TriageOrchestrator {
    /// # Arguments
    /// * `selector` - Grid selector (vision model + inference cache)
    /// * `settings` - Tunables, including the triage model list
    /// * `jobs_root` - Parent of per-job staging directories
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        selector: TriageSelector,
        settings: TriageSettings,
        jobs_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            event_bus,
            selector,
            scorer: None,
            settings,
            jobs_root: jobs_root.into(),
        }
    }

    /// Score final selections of jobs that ask for it
    pub fn with_scorer(mut self, scorer: Option<Arc<CompositeScorer>>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn settings(&self) -> &TriageSettings {
        &self.settings
    }

    /// Create a job for `images` and run it to completion
    pub async fn run_triage(
        &self,
        images: Vec<PathBuf>,
        target: TriageTarget,
        criteria: Criteria,
        passes: u8,
    ) -> TriageResult<TriageOutcome> {
        let job = TriageJob::new(target, criteria, passes, images, self.settings.job_ttl())?;
        db::jobs::save_job(&self.db, &job, self.settings.database_max_lock_wait_ms).await?;
        self.run_job(job.job_id, CancellationToken::new()).await
    }

    /// Run (or resume) a persisted job until it reaches a terminal state
    ///
    /// Any error fails the job with the error's message before it is
    /// returned. A cancelled job returns `Ok` with its partial outcome.
    pub async fn run_job(
        &self,
        job_id: Uuid,
        cancel_token: CancellationToken,
    ) -> TriageResult<TriageOutcome> {
        match self.drive(job_id, &cancel_token).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Triage job failed");
                if let Err(fail_err) = self.fail_job(job_id, &e.to_string()).await {
                    tracing::error!(
                        job_id = %job_id,
                        error = %fail_err,
                        "Failed to record job failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        job_id: Uuid,
        cancel_token: &CancellationToken,
    ) -> TriageResult<TriageOutcome> {
        loop {
            let job = db::jobs::require_job(&self.db, job_id).await?;

            if job.is_terminal() {
                tracing::info!(job_id = %job_id, status = %job.status, "Triage job finished");
                return load_outcome(&self.db, job).await;
            }

            if cancel_token.is_cancelled() {
                self.cancel_job(job).await?;
                continue;
            }

            tracing::debug!(job_id = %job_id, status = %job.status, phase = %job.phase, "Running phase");

            match (job.status, job.phase) {
                (JobStatus::Pending, _) | (JobStatus::Uploading, _) => {
                    self.phase_ingest(job).await?;
                }
                (JobStatus::Processing, JobPhase::GridGeneration) => {
                    self.phase_grid_generation(job, cancel_token).await?;
                }
                (JobStatus::Processing, JobPhase::CoarsePass) => {
                    self.phase_selection(job, Pass::Coarse, cancel_token).await?;
                }
                (JobStatus::Processing, JobPhase::FinePass) => {
                    self.phase_selection(job, Pass::Fine, cancel_token).await?;
                }
                (status, phase) => {
                    return Err(TriageError::InvalidTransition {
                        from: format!("{}/{}", status, phase),
                        to: "next phase".to_string(),
                    });
                }
            }
        }
    }

    /// Forward transition, persisted with compare-and-swap
    pub(super) async fn transition(
        &self,
        job: &mut TriageJob,
        status: JobStatus,
        phase: JobPhase,
    ) -> TriageResult<()> {
        let transition = job.transition_to(status, phase)?;
        if !db::jobs::apply_transition(&self.db, job, &transition).await? {
            return Err(TriageError::TransitionConflict(job.job_id));
        }

        tracing::info!(
            job_id = %job.job_id,
            from = %format!("{}/{}", transition.old_status, transition.old_phase),
            to = %format!("{}/{}", status, phase),
            "Triage job transition"
        );

        self.event_bus.emit_lossy(SiftEvent::TriagePhaseChanged {
            job_id: job.job_id,
            status: status.to_string(),
            phase: phase.to_string(),
            timestamp: transition.transitioned_at,
        });

        Ok(())
    }

    async fn cancel_job(&self, mut job: TriageJob) -> TriageResult<()> {
        let transition = job.cancel()?;
        if !db::jobs::apply_transition(&self.db, &job, &transition).await? {
            return Err(TriageError::TransitionConflict(job.job_id));
        }

        tracing::info!(job_id = %job.job_id, grids_processed = job.grids_processed, "Triage job cancelled");
        self.event_bus.emit_lossy(SiftEvent::TriageJobCancelled {
            job_id: job.job_id,
            grids_processed: job.grids_processed,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, message: &str) -> TriageResult<()> {
        // A concurrent cancel may win the CAS; retry against the fresh row
        for _ in 0..3 {
            let mut job = db::jobs::require_job(&self.db, job_id).await?;
            if job.is_terminal() {
                return Ok(());
            }

            let transition = job.fail(message)?;
            if db::jobs::apply_transition(&self.db, &job, &transition).await? {
                self.event_bus.emit_lossy(SiftEvent::TriageJobFailed {
                    job_id,
                    error_message: message.to_string(),
                    grids_processed: job.grids_processed,
                    timestamp: Utc::now(),
                });
                return Ok(());
            }
        }
        Err(TriageError::TransitionConflict(job_id))
    }

    /// Staging directory for a job's composites
    pub(super) fn grids_dir(&self, job_id: Uuid) -> PathBuf {
        self.jobs_root.join(job_id.to_string()).join("grids")
    }

    pub(super) fn composite_path(&self, job_id: Uuid, pass: Pass, grid_index: u32) -> PathBuf {
        self.grids_dir(job_id)
            .join(format!("{}_{:04}.jpg", pass, grid_index))
    }

    pub(super) fn lock_wait_ms(&self) -> u64 {
        self.settings.database_max_lock_wait_ms
    }
}

/// Map a `spawn_blocking` join failure into the domain error
pub(super) fn join_error(e: tokio::task::JoinError) -> TriageError {
    TriageError::Common(sift_common::Error::Internal(format!(
        "Background task failed: {}",
        e
    )))
}
