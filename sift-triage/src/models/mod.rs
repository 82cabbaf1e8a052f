//! Data models for sift-triage

pub mod image_ref;
pub mod triage_grid;
pub mod triage_job;
pub mod triage_photo;

pub use image_ref::{content_hash, ImageReference};
pub use triage_grid::{GridStatus, Pass, TriageGridRecord};
pub use triage_job::{Criteria, JobPhase, JobStatus, StateTransition, TriageJob, TriageTarget};
pub use triage_photo::TriagePhoto;
