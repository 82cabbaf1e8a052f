//! COARSE_PASS / FINE_PASS: run the selector over every pending grid
//!
//! Grids run concurrently up to `grid_parallelism`. Before a grid starts, the
//! cancellation token and the API call budget are checked; a grid that has
//! started always finishes and is applied in a single transaction. After the
//! pass, the failed-grid fraction decides whether the job continues.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use sift_common::events::SiftEvent;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

use super::TriageOrchestrator;
use crate::db::{self, grids::GridResult};
use crate::error::{TriageError, TriageResult};
use crate::grid::{Coordinate, Grid};
use crate::models::{
    GridStatus, ImageReference, JobPhase, JobStatus, Pass, TriageGridRecord, TriageJob,
    TriagePhoto,
};
use crate::services::prompts;

/// Shared API call budget for one pass
///
/// Calls are reserved before a grid starts (one per model); the unused part
/// of a reservation is returned when the grid finishes.
pub(super) struct BudgetGuard {
    used: AtomicU64,
    limit: Option<u64>,
}

impl BudgetGuard {
    pub(super) fn new(used: u64, limit: Option<u64>) -> Self {
        Self {
            used: AtomicU64::new(used),
            limit,
        }
    }

    /// Reserve `calls`; `false` when that would exceed the limit
    pub(super) fn try_reserve(&self, calls: u64) -> bool {
        let Some(limit) = self.limit else {
            self.used.fetch_add(calls, Ordering::SeqCst);
            return true;
        };
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used + calls <= limit).then_some(used + calls)
            })
            .is_ok()
    }

    pub(super) fn release(&self, calls: u64) {
        self.used.fetch_sub(calls, Ordering::SeqCst);
    }

    pub(super) fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}

/// Why a grid was not started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Cancelled,
    Budget,
}

impl TriageOrchestrator {
    pub(super) async fn phase_selection(
        &self,
        job: TriageJob,
        pass: Pass,
        cancel_token: &CancellationToken,
    ) -> TriageResult<()> {
        let grids = db::grids::load_pass_grids(&self.db, job.job_id, pass).await?;
        let pending: Vec<TriageGridRecord> = grids
            .iter()
            .filter(|g| g.status == GridStatus::Pending)
            .cloned()
            .collect();

        let dimension = match pass {
            Pass::Coarse => self.settings.coarse_grid_dimension,
            Pass::Fine => self.settings.fine_grid_dimension,
        };
        let prompt = match pass {
            Pass::Coarse => prompts::coarse_prompt(&job.criteria, dimension),
            Pass::Fine => prompts::fine_prompt(&job.criteria, dimension),
        };

        let photos = db::photos::load_photos(&self.db, job.job_id).await?;
        let cells = cells_by_grid(&photos, pass);
        let models = &self.settings.triage_models;
        let budget = BudgetGuard::new(job.api_calls, job.max_api_calls);

        tracing::info!(
            job_id = %job.job_id,
            %pass,
            grids = grids.len(),
            pending = pending.len(),
            models = models.len(),
            "Starting selection pass"
        );

        let skipped: Vec<Skip> = stream::iter(pending)
            .map(|record| {
                let cells = &cells;
                let prompt = &prompt;
                let budget = &budget;
                let job = &job;
                async move {
                    if cancel_token.is_cancelled() {
                        return Err(Skip::Cancelled);
                    }
                    let reserved = models.len() as u64;
                    if !budget.try_reserve(reserved) {
                        return Err(Skip::Budget);
                    }

                    let empty = BTreeMap::new();
                    let grid_cells = cells.get(&record.grid_index).unwrap_or(&empty);
                    let result = self.process_grid(job, &record, grid_cells, prompt).await;
                    budget.release(reserved.saturating_sub(result.api_calls));

                    if let Err(e) =
                        db::grids::apply_grid_result(&self.db, job.job_id, &result, self.lock_wait_ms())
                            .await
                    {
                        tracing::error!(
                            job_id = %job.job_id,
                            grid_index = record.grid_index,
                            error = %e,
                            "Failed to apply grid result"
                        );
                        return Ok(Some(TriageError::from(e)));
                    }
                    self.emit_progress(job.job_id, pass).await;
                    Ok(None)
                }
            })
            .buffer_unordered(self.settings.grid_parallelism.max(1))
            .filter_map(|outcome| async move {
                match outcome {
                    Err(skip) => Some(Ok(skip)),
                    Ok(Some(error)) => Some(Err(error)),
                    Ok(None) => None,
                }
            })
            .collect::<Vec<TriageResult<Skip>>>()
            .await
            .into_iter()
            .collect::<TriageResult<Vec<Skip>>>()?;

        let mut job = db::jobs::require_job(&self.db, job.job_id).await?;

        if skipped.contains(&Skip::Cancelled) {
            // Drive loop records the cancellation
            return Ok(());
        }
        if skipped.contains(&Skip::Budget) {
            return Err(TriageError::BudgetExhausted {
                used: budget.used(),
                limit: job.max_api_calls.unwrap_or_default(),
            });
        }

        self.check_pass_health(&job, pass).await?;

        match pass {
            Pass::Coarse => {
                let survivors: Vec<TriagePhoto> = db::photos::load_photos(&self.db, job.job_id)
                    .await?
                    .into_iter()
                    .filter(|p| p.selected_coarse && !p.excluded)
                    .collect();
                db::jobs::set_pass1_survivors(&self.db, job.job_id, survivors.len() as u64).await?;

                tracing::info!(
                    job_id = %job.job_id,
                    pass1_survivors = survivors.len(),
                    "Coarse pass complete"
                );

                if job.passes < 2 || survivors.is_empty() {
                    return self.finalize(job).await;
                }

                let fine_grids = self
                    .build_pass_grids(&job, Pass::Fine, survivors, cancel_token)
                    .await?;
                if cancel_token.is_cancelled() {
                    return Ok(());
                }
                db::jobs::set_total_steps(&self.db, job.job_id, (grids.len() + fine_grids) as u64)
                    .await?;

                self.transition(&mut job, JobStatus::Processing, JobPhase::FinePass)
                    .await
            }
            Pass::Fine => {
                tracing::info!(job_id = %job.job_id, "Fine pass complete");
                self.finalize(job).await
            }
        }
    }

    /// Fail the pass when too many grids failed or none succeeded
    async fn check_pass_health(&self, job: &TriageJob, pass: Pass) -> TriageResult<()> {
        let grids = db::grids::load_pass_grids(&self.db, job.job_id, pass).await?;
        let total = grids.len() as u64;
        if total == 0 {
            return Ok(());
        }

        let failed = grids
            .iter()
            .filter(|g| g.status == GridStatus::Failed)
            .count() as u64;
        let succeeded = grids
            .iter()
            .filter(|g| g.status == GridStatus::Completed)
            .count() as u64;

        if failed as f64 / total as f64 > self.settings.grid_failure_threshold || succeeded == 0 {
            return Err(TriageError::PassFailed {
                pass: pass.to_string(),
                failed,
                total,
            });
        }

        if failed > 0 {
            tracing::warn!(
                job_id = %job.job_id,
                %pass,
                failed,
                total,
                "Pass completed with failed grids"
            );
        }
        Ok(())
    }

    /// Run the selector on one grid; never fails, failures become a failed result
    async fn process_grid(
        &self,
        job: &TriageJob,
        record: &TriageGridRecord,
        cells: &BTreeMap<Coordinate, TriagePhoto>,
        prompt: &str,
    ) -> GridResult {
        let calls = AtomicU64::new(0);
        let sequences: Vec<u32> = cells.values().map(|p| p.sequence).collect();

        let outcome = match self.load_grid(record, cells).await {
            Ok(grid) => {
                self.selector
                    .select_from_grid(&grid, prompt, &self.settings.triage_models, &calls)
                    .await
            }
            Err(e) => Err(e),
        };

        let api_calls = calls.load(Ordering::SeqCst);
        let credits = api_calls as f64 * self.settings.credits_per_call;

        match outcome {
            Ok(selection) => {
                let selected = selection
                    .votes
                    .iter()
                    .filter_map(|(coordinate, votes)| {
                        cells.get(coordinate).map(|photo| (photo.sequence, *votes))
                    })
                    .collect();

                tracing::debug!(
                    job_id = %job.job_id,
                    pass = %record.pass,
                    grid_index = record.grid_index,
                    selected = selection.coordinates.len(),
                    models_failed = selection.models_failed,
                    "Grid processed"
                );

                GridResult {
                    pass: record.pass,
                    grid_index: record.grid_index,
                    selected,
                    failed_sequences: Vec::new(),
                    error_message: None,
                    models_succeeded: selection.models_succeeded,
                    models_failed: selection.models_failed,
                    api_calls,
                    credits,
                }
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    pass = %record.pass,
                    grid_index = record.grid_index,
                    error = %e,
                    "Grid failed, excluding its photos"
                );

                GridResult {
                    pass: record.pass,
                    grid_index: record.grid_index,
                    selected: Vec::new(),
                    failed_sequences: sequences,
                    error_message: Some(e.to_string()),
                    models_succeeded: 0,
                    models_failed: self.settings.triage_models.len() as u32,
                    api_calls,
                    credits,
                }
            }
        }
    }

    /// Read the stored composite, regenerating it if the file is gone
    async fn load_grid(
        &self,
        record: &TriageGridRecord,
        cells: &BTreeMap<Coordinate, TriagePhoto>,
    ) -> TriageResult<Grid> {
        let coordinate_map: BTreeMap<Coordinate, ImageReference> = cells
            .iter()
            .map(|(coordinate, photo)| (*coordinate, photo.image_ref()))
            .collect();

        match tokio::fs::read(&record.composite_path).await {
            Ok(composite) => Ok(Grid {
                grid_index: record.grid_index as usize,
                dimension: record.dimension,
                cell_size_px: record.cell_size_px,
                coordinate_map,
                composite,
            }),
            Err(e) => {
                tracing::warn!(
                    path = %record.composite_path.display(),
                    error = %e,
                    "Composite missing, regenerating grid"
                );
                let images: Vec<ImageReference> = coordinate_map.into_values().collect();
                let grid = self
                    .render_grid(images, record.dimension, record.cell_size_px, record.grid_index)
                    .await?;
                if let Some(parent) = record.composite_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&record.composite_path, &grid.composite).await?;
                Ok(grid)
            }
        }
    }

    async fn emit_progress(&self, job_id: uuid::Uuid, pass: Pass) {
        match db::jobs::load_job(&self.db, job_id).await {
            Ok(Some(job)) => self.event_bus.emit_lossy(SiftEvent::TriageProgressUpdate {
                job_id,
                phase: pass_phase(pass).to_string(),
                current_step: job.current_step,
                total_steps: job.total_steps,
                api_calls: job.api_calls,
                grids_failed: job.grids_failed,
                timestamp: Utc::now(),
            }),
            Ok(None) => {}
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Progress lookup failed"),
        }
    }
}

fn pass_phase(pass: Pass) -> JobPhase {
    match pass {
        Pass::Coarse => JobPhase::CoarsePass,
        Pass::Fine => JobPhase::FinePass,
    }
}

/// Photos of a pass grouped by grid index, keyed by their cell
fn cells_by_grid(
    photos: &[TriagePhoto],
    pass: Pass,
) -> HashMap<u32, BTreeMap<Coordinate, TriagePhoto>> {
    let mut cells: HashMap<u32, BTreeMap<Coordinate, TriagePhoto>> = HashMap::new();
    for photo in photos {
        let (index, coordinate) = match pass {
            Pass::Coarse => (photo.grid_index, photo.grid_coordinate.as_deref()),
            Pass::Fine => (photo.fine_grid_index, photo.fine_grid_coordinate.as_deref()),
        };
        let (Some(index), Some(coordinate)) = (index, coordinate) else {
            continue;
        };
        match coordinate.parse::<Coordinate>() {
            Ok(coordinate) => {
                cells.entry(index).or_default().insert(coordinate, photo.clone());
            }
            Err(e) => tracing::warn!(
                sequence = photo.sequence,
                coordinate,
                error = %e,
                "Ignoring photo with invalid stored coordinate"
            ),
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_reservation() {
        let budget = BudgetGuard::new(0, Some(3));
        assert!(budget.try_reserve(2));
        assert!(!budget.try_reserve(2));
        budget.release(1);
        assert!(budget.try_reserve(2));
        assert_eq!(budget.used(), 3);
    }

    #[test]
    fn test_unlimited_budget() {
        let budget = BudgetGuard::new(10, None);
        assert!(budget.try_reserve(1_000));
        assert_eq!(budget.used(), 1_010);
    }
}
