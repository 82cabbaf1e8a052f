//! Service modules for the triage pipeline
//!
//! - `photo_scanner`: discover source photos in a folder
//! - `vision_client`: remote vision model seam + HTTP client
//! - `coordinate_parser` / `prompts`: talk to the model about grids
//! - `triage_selector`: union consensus over several models per grid
//! - `composite_scorer`: weighted aesthetic/technical scoring
//! - `inference_cache`: content-addressed model response cache
//! - `triage_orchestrator`: job state machine
//! - `job_runner` / `job_cleanup`: background tasks

pub mod composite_scorer;
pub mod coordinate_parser;
pub mod inference_cache;
pub mod job_cleanup;
pub mod job_runner;
pub mod photo_scanner;
pub mod prompts;
pub mod triage_orchestrator;
pub mod triage_selector;
pub mod vision_client;

pub use composite_scorer::{CompositeScorer, ScoreResult, ScorerConfig, WeightedModel};
pub use coordinate_parser::parse_coordinates;
pub use inference_cache::{InferenceCache, MemoryInferenceCache, PutOutcome, SqliteInferenceCache};
pub use job_cleanup::{cleanup_expired_jobs, ensure_not_expired, spawn_cleanup_task};
pub use job_runner::{resume_interrupted_jobs, spawn_triage_job};
pub use photo_scanner::{PhotoScanner, ScanError};
pub use triage_orchestrator::{RankedPhoto, TriageOrchestrator, TriageOutcome};
pub use triage_selector::{GridSelection, TriageSelector};
pub use vision_client::{HttpVisionClient, ModelError, ModelSpec, VisionModel};
