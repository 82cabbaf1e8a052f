//! HTTP API handlers for sift-triage
//!
//! JSON over HTTP for job control, SSE for progress.

pub mod cache;
pub mod health;
pub mod score;
pub mod sse;
pub mod triage;

pub use cache::cache_routes;
pub use health::health_routes;
pub use score::score_routes;
pub use sse::{event_routes, triage_event_stream};
pub use triage::triage_routes;
