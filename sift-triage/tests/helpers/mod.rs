//! Shared test utilities
//!
//! - temp-file SQLite database with the triage schema
//! - synthetic photo fixtures (distinct solid-color PNGs)
//! - scripted `VisionModel` that answers from a closure and counts calls

#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use sift_common::events::EventBus;
use sift_triage::db::settings::TriageSettings;
use sift_triage::services::triage_orchestrator::TriageOrchestrator;
use sift_triage::services::triage_selector::TriageSelector;
use sift_triage::services::vision_client::{ModelError, ModelSpec, VisionModel};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Temp directory holding `test.db` plus a `jobs/` staging folder
///
/// Keep the `TempDir` alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = sift_triage::db::init_database_pool(&temp_dir.path().join("test.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

/// Write `count` distinct PNG photos into `dir`, in sequence order
pub fn generate_test_images(dir: &Path, count: usize) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|i| {
            let color = Rgb([(i % 256) as u8, (i / 256) as u8, 128]);
            let path = dir.join(format!("photo_{:03}.png", i));
            RgbImage::from_pixel(16, 12, color).save(&path).unwrap();
            path
        })
        .collect()
}

/// One scripted model answer
pub enum Reply {
    Text(String),
    Fail(ModelError),
    /// Never answers
    Hang,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

type Script = dyn Fn(usize, &str, &ModelSpec) -> Reply + Send + Sync;

/// Vision model answering from a closure of `(call_number, prompt, model)`
///
/// Call numbers start at 1 and count every call across all models.
pub struct ScriptedModel {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(script: impl Fn(usize, &str, &ModelSpec) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Same answer to everything
    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _, _| Reply::Text(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn analyze(
        &self,
        _image: &[u8],
        prompt: &str,
        model: &ModelSpec,
    ) -> Result<String, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match (self.script)(call, prompt, model) {
            Reply::Text(text) => Ok(text),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// `true` for second-pass prompts
pub fn is_fine_prompt(prompt: &str) -> bool {
    prompt.contains("shortlisted")
}

/// Small, fast settings: tiny cells, sequential grids, `models` triage models
pub fn test_settings(models: usize) -> TriageSettings {
    TriageSettings {
        coarse_cell_px: 24,
        fine_cell_px: 48,
        grid_parallelism: 1,
        model_call_timeout_secs: 5,
        triage_models: (0..models)
            .map(|i| ModelSpec::new(format!("model-{}", i), "v1"))
            .collect(),
        ..TriageSettings::default()
    }
}

/// Orchestrator without cache or scorer
pub fn build_orchestrator(
    db: &SqlitePool,
    model: Arc<dyn VisionModel>,
    settings: TriageSettings,
    jobs_root: &Path,
) -> TriageOrchestrator {
    let selector = TriageSelector::new(model, None, settings.model_call_timeout());
    TriageOrchestrator::new(db.clone(), EventBus::new(100), selector, settings, jobs_root)
}
