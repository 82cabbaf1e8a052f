//! sift-triage library interface
//!
//! Exposes the triage pipeline and HTTP API for the binary and for
//! integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod grid;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, TriageError, TriageResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sift_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::services::inference_cache::{InferenceCache, SqliteInferenceCache};
use crate::services::vision_client::VisionModel;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Cancellation tokens for running triage jobs
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Remote vision model; `None` when no API key is configured
    pub vision_model: Option<Arc<dyn VisionModel>>,
    /// Shared across jobs and the scorer
    pub inference_cache: Arc<dyn InferenceCache>,
    /// Parent of per-job staging directories
    pub jobs_root: PathBuf,
}

impl AppState {
    /// State with the SQLite-backed cache and no vision model
    pub fn new(db: SqlitePool, event_bus: EventBus, jobs_root: impl Into<PathBuf>) -> Self {
        Self {
            inference_cache: Arc::new(SqliteInferenceCache::new(db.clone())),
            db,
            event_bus,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            vision_model: None,
            jobs_root: jobs_root.into(),
        }
    }

    pub fn with_vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.vision_model = Some(model);
        self
    }

    pub fn with_inference_cache(mut self, cache: Arc<dyn InferenceCache>) -> Self {
        self.inference_cache = cache;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::triage_routes())
        .merge(api::score_routes())
        .merge(api::cache_routes())
        .merge(api::event_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
