//! Target enforcement and the final selection
//!
//! Candidates are the photos selected in the last pass that ran. They are
//! ranked by last-pass votes (desc), then coarse votes (desc), then ingest
//! sequence (asc), and the first `target_count` are kept. Fewer candidates
//! than the target keeps all of them; the selection is never padded.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sift_common::events::SiftEvent;
use sqlx::SqlitePool;
use std::cmp::Reverse;

use super::TriageOrchestrator;
use crate::db;
use crate::error::TriageResult;
use crate::models::{ImageReference, JobPhase, JobStatus, TriageJob, TriagePhoto};
use crate::services::composite_scorer::ScoreResult;

/// One photo of the final selection
#[derive(Debug, Clone, Serialize)]
pub struct RankedPhoto {
    /// 1-based
    pub rank: u32,
    pub image: ImageReference,
    pub original_filename: String,
    pub coarse_votes: u32,
    pub fine_votes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreResult>,
}

/// Terminal job state plus its ordered selection
#[derive(Debug, Clone, Serialize)]
pub struct TriageOutcome {
    pub job: TriageJob,
    pub selection: Vec<RankedPhoto>,
}

/// Final candidates of a job in rank order (not yet truncated)
pub fn rank_candidates(photos: &[TriagePhoto], passes: u8) -> Vec<&TriagePhoto> {
    let two_pass = passes >= 2;
    let mut candidates: Vec<&TriagePhoto> = photos
        .iter()
        .filter(|p| !p.excluded)
        .filter(|p| if two_pass { p.selected_fine } else { p.selected_coarse })
        .collect();

    candidates.sort_by_key(|p| {
        let last_votes = if two_pass { p.fine_votes } else { p.coarse_votes };
        (Reverse(last_votes), Reverse(p.coarse_votes), p.sequence)
    });
    candidates
}

/// Load the stored outcome of a job (empty selection unless completed)
pub async fn load_outcome(db: &SqlitePool, job: TriageJob) -> TriageResult<TriageOutcome> {
    let photos = db::photos::load_final_selection(db, job.job_id).await?;
    let mut scores = db::scores::load_scores_for_job(db, job.job_id).await?;

    let selection = photos
        .into_iter()
        .map(|photo| RankedPhoto {
            rank: photo.final_rank.unwrap_or_default(),
            image: photo.image_ref(),
            score: scores.remove(&photo.content_hash),
            original_filename: photo.original_filename,
            coarse_votes: photo.coarse_votes,
            fine_votes: photo.fine_votes,
        })
        .collect();

    Ok(TriageOutcome { job, selection })
}

impl TriageOrchestrator {
    /// Truncate to target, score if requested, complete the job
    pub(super) async fn finalize(&self, job: TriageJob) -> TriageResult<()> {
        let photos = db::photos::load_photos(&self.db, job.job_id).await?;
        let mut ranked = rank_candidates(&photos, job.passes);
        let candidates = ranked.len();
        let target_count = job.target.target_count(job.total_input as usize);
        ranked.truncate(target_count);

        let sequences: Vec<u32> = ranked.iter().map(|p| p.sequence).collect();
        db::photos::set_final_selection(&self.db, job.job_id, &sequences).await?;

        tracing::info!(
            job_id = %job.job_id,
            candidates,
            target = target_count,
            final_selected = sequences.len(),
            "Final selection stored"
        );

        if job.score_selected {
            self.score_selection(&job, &ranked).await;
        }

        let mut job = db::jobs::require_job(&self.db, job.job_id).await?;
        self.transition(&mut job, JobStatus::Completed, JobPhase::Complete)
            .await?;

        let duration_seconds = match (job.started_at, job.completed_at) {
            (Some(start), Some(end)) => (end - start).num_seconds().max(0) as u64,
            _ => 0,
        };
        self.event_bus.emit_lossy(SiftEvent::TriageJobCompleted {
            job_id: job.job_id,
            total_input: job.total_input,
            final_selected: job.final_selected,
            duration_seconds,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    /// Score each selected photo; a failure is logged and skipped
    async fn score_selection(&self, job: &TriageJob, selected: &[&TriagePhoto]) {
        let Some(scorer) = &self.scorer else {
            tracing::warn!(job_id = %job.job_id, "Scoring requested but no scorer is configured");
            return;
        };

        let images: Vec<ImageReference> = selected.iter().map(|p| p.image_ref()).collect();
        let scored = stream::iter(images)
            .map(|image| async move {
                match scorer.score(&image).await {
                    Ok(score) => {
                        if let Err(e) =
                            db::scores::save_score(&self.db, job.job_id, &image.id, &score).await
                        {
                            tracing::warn!(job_id = %job.job_id, image_id = %image.id, error = %e, "Failed to store score");
                            return false;
                        }
                        true
                    }
                    Err(e) => {
                        tracing::warn!(
                            job_id = %job.job_id,
                            image_id = %image.id,
                            error = %e,
                            "Scoring failed for selected photo"
                        );
                        false
                    }
                }
            })
            .buffer_unordered(self.settings.grid_parallelism.max(1))
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        tracing::info!(job_id = %job.job_id, scored, selected = selected.len(), "Selection scored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn photo(sequence: u32, coarse: Option<u32>, fine: Option<u32>) -> TriagePhoto {
        let mut p = TriagePhoto::from_image(
            Uuid::nil(),
            sequence,
            &ImageReference::new(format!("h{}", sequence), format!("/p/{}.jpg", sequence), 1, 1),
        );
        if let Some(votes) = coarse {
            p.selected_coarse = true;
            p.coarse_votes = votes;
        }
        if let Some(votes) = fine {
            p.selected_fine = true;
            p.fine_votes = votes;
        }
        p
    }

    fn order(ranked: Vec<&TriagePhoto>) -> Vec<u32> {
        ranked.iter().map(|p| p.sequence).collect()
    }

    #[test]
    fn test_single_pass_ranks_votes_then_sequence() {
        let photos = vec![
            photo(0, Some(1), None),
            photo(1, None, None),
            photo(2, Some(2), None),
            photo(3, Some(1), None),
            photo(4, Some(2), None),
        ];
        assert_eq!(order(rank_candidates(&photos, 1)), vec![2, 4, 0, 3]);
    }

    #[test]
    fn test_two_pass_uses_fine_votes_then_coarse() {
        let photos = vec![
            photo(0, Some(1), Some(1)),
            photo(1, Some(2), Some(1)),
            photo(2, Some(2), None),
            photo(3, Some(1), Some(2)),
        ];
        assert_eq!(order(rank_candidates(&photos, 2)), vec![3, 1, 0]);
    }

    #[test]
    fn test_excluded_photos_are_not_candidates() {
        let mut excluded = photo(0, Some(3), None);
        excluded.excluded = true;
        let photos = vec![excluded, photo(1, Some(1), None)];
        assert_eq!(order(rank_candidates(&photos, 1)), vec![1]);
    }

    #[test]
    fn test_ranking_ignores_input_order() {
        let mut photos = vec![
            photo(5, Some(1), None),
            photo(2, Some(1), None),
            photo(9, Some(3), None),
        ];
        let forward = order(rank_candidates(&photos, 1));
        photos.reverse();
        assert_eq!(order(rank_candidates(&photos, 1)), forward);
    }
}
