//! GRID_GENERATION: build the coarse composites
//!
//! Photos are packed into grids in ingest order. When a photo cannot be
//! decoded it is excluded and the grid is rebuilt from the remaining queue,
//! so every grid is as full as the input allows. Composites are written to
//! the job's staging directory and every cell assignment is persisted before
//! the job moves on to the coarse pass.

use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

use super::{join_error, TriageOrchestrator};
use crate::db;
use crate::error::{TriageError, TriageResult};
use crate::grid::{self, Coordinate, Grid};
use crate::models::{
    GridStatus, ImageReference, JobPhase, JobStatus, Pass, TriageGridRecord, TriageJob,
    TriagePhoto,
};

impl TriageOrchestrator {
    pub(super) async fn phase_grid_generation(
        &self,
        mut job: TriageJob,
        cancel_token: &CancellationToken,
    ) -> TriageResult<()> {
        let photos: Vec<TriagePhoto> = db::photos::load_photos(&self.db, job.job_id)
            .await?
            .into_iter()
            .filter(|p| !p.excluded)
            .collect();

        let grid_count = self
            .build_pass_grids(&job, Pass::Coarse, photos, cancel_token)
            .await?;

        if cancel_token.is_cancelled() {
            // Picked up by the drive loop
            return Ok(());
        }

        if grid_count == 0 {
            return Err(TriageError::Common(sift_common::Error::InvalidInput(
                "No decodable photos in job".to_string(),
            )));
        }

        db::jobs::set_total_steps(&self.db, job.job_id, grid_count as u64).await?;

        tracing::info!(job_id = %job.job_id, grids = grid_count, "Coarse grids generated");

        self.transition(&mut job, JobStatus::Processing, JobPhase::CoarsePass)
            .await
    }

    /// Generate and persist every grid of `pass` from `photos` (in order)
    ///
    /// Replaces any grids of the pass left by an interrupted run. Returns the
    /// number of grids written.
    pub(super) async fn build_pass_grids(
        &self,
        job: &TriageJob,
        pass: Pass,
        photos: Vec<TriagePhoto>,
        cancel_token: &CancellationToken,
    ) -> TriageResult<usize> {
        let (dimension, cell_size_px) = match pass {
            Pass::Coarse => (
                self.settings.coarse_grid_dimension,
                self.settings.coarse_cell_px,
            ),
            Pass::Fine => (self.settings.fine_grid_dimension, self.settings.fine_cell_px),
        };
        let capacity = grid::capacity(dimension);

        db::grids::delete_pass_grids(&self.db, job.job_id, pass).await?;
        db::photos::clear_pass_assignments(&self.db, job.job_id, pass).await?;
        tokio::fs::create_dir_all(self.grids_dir(job.job_id)).await?;

        let mut queue: VecDeque<TriagePhoto> = photos.into();
        let mut grid_index = 0u32;

        while !queue.is_empty() {
            if cancel_token.is_cancelled() {
                tracing::info!(job_id = %job.job_id, %pass, "Grid generation cancelled");
                return Ok(grid_index as usize);
            }

            let batch: Vec<TriagePhoto> = queue.drain(..capacity.min(queue.len())).collect();
            let images: Vec<ImageReference> = batch.iter().map(TriagePhoto::image_ref).collect();

            match self.render_grid(images, dimension, cell_size_px, grid_index).await {
                Ok(grid) => {
                    self.persist_grid(job, pass, &grid, &batch).await?;
                    grid_index += 1;
                }
                Err(TriageError::ImageDecode {
                    image_id,
                    path,
                    reason,
                }) => {
                    let Some(bad) = batch.iter().position(|p| p.content_hash == image_id) else {
                        return Err(TriageError::ImageDecode {
                            image_id,
                            path,
                            reason,
                        });
                    };

                    tracing::warn!(
                        job_id = %job.job_id,
                        image_id = %image_id,
                        path = %path,
                        reason = %reason,
                        "Excluding undecodable photo"
                    );
                    db::photos::exclude_photo(
                        &self.db,
                        job.job_id,
                        batch[bad].sequence,
                        &format!("decode failed: {}", reason),
                    )
                    .await?;

                    // Put the rest back in front, order preserved
                    for (i, photo) in batch.into_iter().enumerate().rev() {
                        if i != bad {
                            queue.push_front(photo);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(grid_index as usize)
    }

    /// Composite generation is CPU-bound; keep it off the async workers
    pub(super) async fn render_grid(
        &self,
        images: Vec<ImageReference>,
        dimension: u32,
        cell_size_px: u32,
        grid_index: u32,
    ) -> TriageResult<Grid> {
        let quality = self.settings.jpeg_quality;
        tokio::task::spawn_blocking(move || {
            grid::generate_grid_with_quality(
                &images,
                dimension,
                cell_size_px,
                grid_index as usize,
                quality,
            )
        })
        .await
        .map_err(join_error)?
    }

    async fn persist_grid(
        &self,
        job: &TriageJob,
        pass: Pass,
        grid: &Grid,
        batch: &[TriagePhoto],
    ) -> TriageResult<()> {
        let grid_index = grid.grid_index as u32;
        let composite_path = self.composite_path(job.job_id, pass, grid_index);
        tokio::fs::write(&composite_path, &grid.composite).await?;

        db::grids::upsert_grid(
            &self.db,
            &TriageGridRecord {
                job_id: job.job_id,
                pass,
                grid_index,
                dimension: grid.dimension,
                cell_size_px: grid.cell_size_px,
                composite_path,
                status: GridStatus::Pending,
                models_succeeded: 0,
                models_failed: 0,
                error_message: None,
            },
        )
        .await?;

        let cells: Vec<(u32, Coordinate)> = batch
            .iter()
            .enumerate()
            .map(|(i, photo)| (photo.sequence, Coordinate::from_cell_index(i, grid.dimension)))
            .collect();
        db::photos::assign_grid_cells(&self.db, job.job_id, pass, grid_index, &cells).await?;

        tracing::debug!(
            job_id = %job.job_id,
            %pass,
            grid_index,
            photos = batch.len(),
            "Grid generated"
        );
        Ok(())
    }
}
