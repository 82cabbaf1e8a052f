//! UPLOADING: hash and stage the job's source photos
//!
//! Photos are identified by the SHA-256 of their bytes; a second file with
//! the same content is dropped. Ingest is idempotent: an interrupted upload
//! is simply redone from scratch.

use chrono::Utc;
use sift_common::events::SiftEvent;
use std::collections::HashSet;
use std::path::PathBuf;

use super::{join_error, TriageOrchestrator};
use crate::db;
use crate::error::{TriageError, TriageResult};
use crate::models::{ImageReference, JobPhase, JobStatus, TriageJob, TriagePhoto};

impl TriageOrchestrator {
    pub(super) async fn phase_ingest(&self, mut job: TriageJob) -> TriageResult<()> {
        if job.status == JobStatus::Pending {
            self.transition(&mut job, JobStatus::Uploading, JobPhase::Uploading)
                .await?;
        }

        self.event_bus.emit_lossy(SiftEvent::TriageJobStarted {
            job_id: job.job_id,
            source_count: job.source_paths.len(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            job_id = %job.job_id,
            sources = job.source_paths.len(),
            "Ingesting source photos"
        );

        db::photos::delete_photos_for_job(&self.db, job.job_id).await?;

        let paths = job.source_paths.clone();
        let hashed: Vec<(PathBuf, TriageResult<ImageReference>)> =
            tokio::task::spawn_blocking(move || {
                paths
                    .into_iter()
                    .map(|path| {
                        let image = ImageReference::from_file(&path);
                        (path, image)
                    })
                    .collect()
            })
            .await
            .map_err(join_error)?;

        let mut seen = HashSet::new();
        let mut photos = Vec::with_capacity(hashed.len());
        for (path, image) in hashed {
            let image = match image {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.job_id,
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable source photo"
                    );
                    continue;
                }
            };

            if !seen.insert(image.id.clone()) {
                tracing::info!(
                    job_id = %job.job_id,
                    path = %path.display(),
                    image_id = %image.id,
                    "Skipping duplicate photo"
                );
                continue;
            }

            photos.push(TriagePhoto::from_image(job.job_id, photos.len() as u32, &image));
        }

        if photos.is_empty() {
            return Err(TriageError::Common(sift_common::Error::InvalidInput(
                "No readable source photos".to_string(),
            )));
        }

        db::photos::insert_photos(&self.db, &photos).await?;
        db::jobs::set_total_input(&self.db, job.job_id, photos.len() as u64).await?;

        tracing::info!(
            job_id = %job.job_id,
            total_input = photos.len(),
            "Source photos staged"
        );

        self.transition(&mut job, JobStatus::Processing, JobPhase::GridGeneration)
            .await
    }
}
