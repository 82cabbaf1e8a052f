//! Triage selector
//!
//! Shows one grid composite to every configured model concurrently, parses
//! each answer into coordinates and merges them by union. Each coordinate
//! keeps a vote count (how many models picked it) for ranking later.

use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::coordinate_parser::parse_coordinates;
use super::inference_cache::InferenceCache;
use super::vision_client::{ModelError, ModelSpec, VisionModel};
use crate::error::TriageError;
use crate::grid::{Coordinate, Grid};

/// Cache identity of a grid query: SHA-256 over composite bytes and prompt
pub fn grid_cache_key(composite: &[u8], prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(composite);
    hasher.update([0u8]);
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Merged answer for one grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridSelection {
    pub grid_index: usize,
    /// Union of every model's in-range, populated coordinates
    pub coordinates: BTreeSet<Coordinate>,
    /// Models that picked each coordinate
    pub votes: BTreeMap<Coordinate, u32>,
    pub models_succeeded: u32,
    pub models_failed: u32,
    /// `model: reason` per failed model
    pub failures: Vec<String>,
}

pub struct TriageSelector {
    model: Arc<dyn VisionModel>,
    cache: Option<Arc<dyn InferenceCache>>,
    call_timeout: Duration,
}

impl TriageSelector {
    pub fn new(
        model: Arc<dyn VisionModel>,
        cache: Option<Arc<dyn InferenceCache>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            model,
            cache,
            call_timeout,
        }
    }

    /// Query every model on `grid` and merge the answers
    ///
    /// `api_calls` is incremented once per model call actually sent (cache
    /// hits are free).
    ///
    /// # Errors
    /// `AllModelsFailed` when no model produced a usable answer.
    pub async fn select_from_grid(
        &self,
        grid: &Grid,
        prompt: &str,
        models: &[ModelSpec],
        api_calls: &AtomicU64,
    ) -> Result<GridSelection, TriageError> {
        let cache_key = grid_cache_key(&grid.composite, prompt);

        let answers = join_all(
            models
                .iter()
                .map(|model| self.query_model(grid, prompt, model, &cache_key, api_calls)),
        )
        .await;

        let mut votes: BTreeMap<Coordinate, u32> = BTreeMap::new();
        let mut failures = Vec::new();
        let mut models_succeeded = 0u32;

        for (model, answer) in models.iter().zip(answers) {
            match answer {
                Ok(coordinates) => {
                    models_succeeded += 1;
                    for coordinate in coordinates {
                        if grid.image_at(&coordinate).is_some() {
                            *votes.entry(coordinate).or_insert(0) += 1;
                        } else {
                            tracing::debug!(
                                grid_index = grid.grid_index,
                                model = %model,
                                coordinate = %coordinate,
                                "Dropping coordinate of blank cell"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        grid_index = grid.grid_index,
                        model = %model,
                        error = %e,
                        "Model failed on grid"
                    );
                    failures.push(format!("{}: {}", model, e));
                }
            }
        }

        if models_succeeded == 0 {
            return Err(TriageError::AllModelsFailed {
                grid_index: grid.grid_index,
                failures,
            });
        }

        Ok(GridSelection {
            grid_index: grid.grid_index,
            coordinates: votes.keys().copied().collect(),
            votes,
            models_succeeded,
            models_failed: failures.len() as u32,
            failures,
        })
    }

    async fn query_model(
        &self,
        grid: &Grid,
        prompt: &str,
        model: &ModelSpec,
        cache_key: &str,
        api_calls: &AtomicU64,
    ) -> Result<BTreeSet<Coordinate>, TriageError> {
        let range = (grid.dimension, grid.dimension);

        if let Some(cache) = &self.cache {
            match cache.get(cache_key, model).await {
                Ok(Some(cached)) => {
                    tracing::debug!(grid_index = grid.grid_index, model = %model, "Inference cache hit");
                    return parse_coordinates(&cached, range);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Inference cache read failed"),
            }
        }

        self.model.ready().await;
        api_calls.fetch_add(1, Ordering::SeqCst);
        let response = tokio::time::timeout(
            self.call_timeout,
            self.model.analyze(&grid.composite, prompt, model),
        )
        .await
        .map_err(|_| ModelError::Timeout(self.call_timeout))??;

        let coordinates = parse_coordinates(&response, range)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(cache_key, model, &response).await {
                tracing::warn!(error = %e, "Inference cache write failed");
            }
        }

        Ok(coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageReference;
    use async_trait::async_trait;

    /// Answers with a fixed text per model name
    struct FixedAnswers(Vec<(&'static str, Result<&'static str, ()>)>);

    #[async_trait]
    impl VisionModel for FixedAnswers {
        async fn analyze(
            &self,
            _image: &[u8],
            _prompt: &str,
            model: &ModelSpec,
        ) -> Result<String, ModelError> {
            match self.0.iter().find(|(name, _)| *name == model.name) {
                Some((_, Ok(text))) => Ok(text.to_string()),
                _ => Err(ModelError::Transport("connection reset".to_string())),
            }
        }
    }

    /// Slow to grant a call slot, instant to answer
    struct Throttled {
        queue_delay: Duration,
    }

    #[async_trait]
    impl VisionModel for Throttled {
        async fn analyze(
            &self,
            _image: &[u8],
            _prompt: &str,
            _model: &ModelSpec,
        ) -> Result<String, ModelError> {
            Ok("A1".to_string())
        }

        async fn ready(&self) {
            tokio::time::sleep(self.queue_delay).await;
        }
    }

    fn grid_with(count: usize, dimension: u32) -> Grid {
        let coordinate_map = (0..count)
            .map(|i| {
                (
                    Coordinate::from_cell_index(i, dimension),
                    ImageReference::new(format!("img{}", i), format!("/p/{}.jpg", i), 1, 1),
                )
            })
            .collect();
        Grid {
            grid_index: 0,
            dimension,
            cell_size_px: 8,
            coordinate_map,
            composite: vec![1, 2, 3],
        }
    }

    fn specs(names: &[&str]) -> Vec<ModelSpec> {
        names.iter().map(|n| ModelSpec::new(*n, "1")).collect()
    }

    #[tokio::test]
    async fn test_union_with_votes() {
        let model = Arc::new(FixedAnswers(vec![("a", Ok("A1, B2")), ("b", Ok("B2 and C3"))]));
        let selector = TriageSelector::new(model, None, Duration::from_secs(5));
        let calls = AtomicU64::new(0);

        let selection = selector
            .select_from_grid(&grid_with(9, 3), "pick", &specs(&["a", "b"]), &calls)
            .await
            .unwrap();

        let picked: Vec<String> = selection.coordinates.iter().map(|c| c.to_string()).collect();
        assert_eq!(picked, vec!["A1", "B2", "C3"]);
        assert_eq!(selection.votes[&"B2".parse().unwrap()], 2);
        assert_eq!(selection.votes[&"A1".parse().unwrap()], 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_wait_is_not_a_timeout() {
        let model = Arc::new(Throttled {
            queue_delay: Duration::from_millis(300),
        });
        let selector = TriageSelector::new(model, None, Duration::from_millis(100));
        let calls = AtomicU64::new(0);

        let selection = selector
            .select_from_grid(&grid_with(4, 2), "pick", &specs(&["a"]), &calls)
            .await
            .unwrap();

        assert_eq!(selection.coordinates.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blank_cells_are_dropped() {
        let model = Arc::new(FixedAnswers(vec![("a", Ok("A1, C3"))]));
        let selector = TriageSelector::new(model, None, Duration::from_secs(5));
        let calls = AtomicU64::new(0);

        // 5 images in a 3x3 grid: C3 is blank
        let selection = selector
            .select_from_grid(&grid_with(5, 3), "pick", &specs(&["a"]), &calls)
            .await
            .unwrap();
        assert_eq!(selection.coordinates.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_is_tolerated() {
        let model = Arc::new(FixedAnswers(vec![("a", Ok("A1")), ("b", Ok("no idea"))]));
        let selector = TriageSelector::new(model, None, Duration::from_secs(5));
        let calls = AtomicU64::new(0);

        let selection = selector
            .select_from_grid(&grid_with(4, 2), "pick", &specs(&["a", "b", "c"]), &calls)
            .await
            .unwrap();
        assert_eq!(selection.models_succeeded, 1);
        assert_eq!(selection.models_failed, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_all_models_failed() {
        let model = Arc::new(FixedAnswers(vec![]));
        let selector = TriageSelector::new(model, None, Duration::from_secs(5));
        let calls = AtomicU64::new(0);

        let err = selector
            .select_from_grid(&grid_with(4, 2), "pick", &specs(&["a", "b"]), &calls)
            .await
            .unwrap_err();
        match err {
            TriageError::AllModelsFailed { failures, .. } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_none_is_success() {
        let model = Arc::new(FixedAnswers(vec![("a", Ok("NONE"))]));
        let selector = TriageSelector::new(model, None, Duration::from_secs(5));
        let calls = AtomicU64::new(0);

        let selection = selector
            .select_from_grid(&grid_with(4, 2), "pick", &specs(&["a"]), &calls)
            .await
            .unwrap();
        assert!(selection.coordinates.is_empty());
        assert_eq!(selection.models_succeeded, 1);
    }

    #[test]
    fn test_grid_cache_key_depends_on_prompt() {
        assert_ne!(grid_cache_key(b"grid", "coarse"), grid_cache_key(b"grid", "fine"));
        assert_eq!(grid_cache_key(b"grid", "coarse"), grid_cache_key(b"grid", "coarse"));
    }
}
