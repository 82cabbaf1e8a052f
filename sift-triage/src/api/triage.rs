//! Triage job API handlers
//!
//! POST /triage/start, GET /triage/status/:job_id, POST /triage/cancel/:job_id,
//! GET /triage/results/:job_id

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::db;
use crate::db::settings::TriageSettings;
use crate::error::{ApiError, ApiResult};
use crate::models::{Criteria, JobPhase, JobStatus, TriageJob, TriageTarget};
use crate::services::job_cleanup::ensure_not_expired;
use crate::services::photo_scanner::PhotoScanner;
use crate::services::triage_orchestrator::{load_outcome, TriageOutcome};
use crate::AppState;

fn default_passes() -> u8 {
    2
}

/// POST /triage/start request
///
/// Exactly one of `source_folder` and `paths` names the input.
#[derive(Debug, Deserialize)]
pub struct StartTriageRequest {
    #[serde(default)]
    pub source_folder: Option<String>,
    #[serde(default)]
    pub paths: Option<Vec<PathBuf>>,
    /// `"20%"` or `"25"`
    pub target: String,
    #[serde(default)]
    pub criteria: Option<String>,
    #[serde(default = "default_passes")]
    pub passes: u8,
    #[serde(default)]
    pub max_api_calls: Option<u64>,
    #[serde(default)]
    pub score_selected: bool,
}

/// POST /triage/start response
#[derive(Debug, Serialize)]
pub struct StartTriageResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// GET /triage/status response
#[derive(Debug, Serialize)]
pub struct TriageStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub target: TriageTarget,
    pub criteria: Criteria,
    pub passes: u8,
    pub current_step: u64,
    pub total_steps: u64,
    pub total_input: u64,
    pub pass1_survivors: u64,
    pub final_selected: u64,
    pub photos_evaluated: u64,
    pub photos_excluded: u64,
    pub grids_processed: u64,
    pub grids_failed: u64,
    pub api_calls: u64,
    pub credits_deducted: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_api_calls: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl From<TriageJob> for TriageStatusResponse {
    fn from(job: TriageJob) -> Self {
        Self {
            photos_evaluated: job.photos_evaluated(),
            job_id: job.job_id,
            status: job.status,
            phase: job.phase,
            target: job.target,
            criteria: job.criteria,
            passes: job.passes,
            current_step: job.current_step,
            total_steps: job.total_steps,
            total_input: job.total_input,
            pass1_survivors: job.pass1_survivors,
            final_selected: job.final_selected,
            photos_excluded: job.photos_excluded,
            grids_processed: job.grids_processed,
            grids_failed: job.grids_failed,
            api_calls: job.api_calls,
            credits_deducted: job.credits_deducted,
            max_api_calls: job.max_api_calls,
            error_message: job.error_message,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            expires_at: job.expires_at,
        }
    }
}

/// POST /triage/cancel response
#[derive(Debug, Serialize)]
pub struct CancelTriageResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// `true` when a running task was signalled; it records the cancellation itself
    pub signalled: bool,
    pub grids_processed: u64,
}

/// POST /triage/start
///
/// Validates the request, persists a pending job and spawns its task.
pub async fn start_triage(
    State(state): State<AppState>,
    Json(request): Json<StartTriageRequest>,
) -> ApiResult<Json<StartTriageResponse>> {
    let target: TriageTarget = request.target.parse().map_err(ApiError::BadRequest)?;
    let criteria: Criteria = match request.criteria.as_deref() {
        Some(text) => text.parse().map_err(ApiError::BadRequest)?,
        None => Criteria::default(),
    };

    if request.max_api_calls == Some(0) {
        return Err(ApiError::BadRequest(
            "max_api_calls must be at least 1".to_string(),
        ));
    }

    if state.vision_model.is_none() {
        return Err(ApiError::Internal(
            "Vision model not configured (set SIFT_VISION_API_KEY)".to_string(),
        ));
    }

    let sources = resolve_sources(request.source_folder, request.paths).await?;
    let settings = TriageSettings::load(&state.db).await?;

    let job = TriageJob::new(target, criteria, request.passes, sources, settings.job_ttl())?
        .with_max_api_calls(request.max_api_calls)
        .with_scoring(request.score_selected);

    db::jobs::save_job(&state.db, &job, settings.database_max_lock_wait_ms).await?;

    tracing::info!(
        job_id = %job.job_id,
        sources = job.source_paths.len(),
        target = %job.target,
        criteria = %job.criteria,
        passes = job.passes,
        "Triage job created"
    );

    let response = StartTriageResponse {
        job_id: job.job_id,
        status: job.status,
        created_at: job.created_at,
    };

    crate::services::job_runner::spawn_triage_job(state, job.job_id).await;

    Ok(Json(response))
}

/// Turn the request's input into a list of files
async fn resolve_sources(
    source_folder: Option<String>,
    paths: Option<Vec<PathBuf>>,
) -> ApiResult<Vec<PathBuf>> {
    let sources = match (source_folder, paths) {
        (Some(folder), None) => {
            let root = PathBuf::from(&folder);
            tokio::task::spawn_blocking(move || PhotoScanner::new().scan(&root))
                .await
                .map_err(|e| ApiError::Internal(format!("Folder scan task failed: {}", e)))?
                .map_err(|e| ApiError::BadRequest(e.to_string()))?
        }
        (None, Some(paths)) => paths,
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "Specify either source_folder or paths, not both".to_string(),
            ))
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "One of source_folder or paths is required".to_string(),
            ))
        }
    };

    if sources.is_empty() {
        return Err(ApiError::BadRequest("No source photos found".to_string()));
    }
    Ok(sources)
}

/// Load a job for a read request: 404 when unknown, 410 when expired
async fn load_live_job(state: &AppState, job_id: Uuid) -> ApiResult<TriageJob> {
    let job = db::jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Triage job not found: {}", job_id)))?;
    ensure_not_expired(&job, Utc::now())?;
    Ok(job)
}

/// GET /triage/status/:job_id
pub async fn get_triage_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<TriageStatusResponse>> {
    let job = load_live_job(&state, job_id).await?;
    tracing::debug!(job_id = %job_id, status = %job.status, phase = %job.phase, "Status query");
    Ok(Json(job.into()))
}

/// POST /triage/cancel/:job_id
///
/// A running job is signalled through its token; a job with no task (e.g.
/// never resumed) is cancelled directly.
pub async fn cancel_triage(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<CancelTriageResponse>> {
    let mut job = db::jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Triage job not found: {}", job_id)))?;

    if job.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Triage job already in terminal state: {}",
            job.status
        )));
    }

    if let Some(token) = state.cancellation_tokens.read().await.get(&job_id) {
        token.cancel();
        tracing::info!(job_id = %job_id, "Cancellation signalled to running triage job");
        return Ok(Json(CancelTriageResponse {
            job_id,
            status: job.status,
            signalled: true,
            grids_processed: job.grids_processed,
        }));
    }

    let transition = job.cancel()?;
    if !db::jobs::apply_transition(&state.db, &job, &transition).await? {
        return Err(ApiError::Conflict(format!(
            "Triage job {} changed state during cancellation",
            job_id
        )));
    }

    state
        .event_bus
        .emit_lossy(sift_common::events::SiftEvent::TriageJobCancelled {
            job_id,
            grids_processed: job.grids_processed,
            timestamp: Utc::now(),
        });
    tracing::info!(job_id = %job_id, "Triage job cancelled");

    Ok(Json(CancelTriageResponse {
        job_id,
        status: job.status,
        signalled: false,
        grids_processed: job.grids_processed,
    }))
}

/// GET /triage/results/:job_id
///
/// 409 while the job is still running. Failed and cancelled jobs return
/// their counters with an empty selection.
pub async fn get_triage_results(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<TriageOutcome>> {
    let job = load_live_job(&state, job_id).await?;

    if !job.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Triage job {} is still {} ({})",
            job_id, job.status, job.phase
        )));
    }

    Ok(Json(load_outcome(&state.db, job).await?))
}

/// Build triage routes
pub fn triage_routes() -> Router<AppState> {
    Router::new()
        .route("/triage/start", post(start_triage))
        .route("/triage/status/:job_id", get(get_triage_status))
        .route("/triage/cancel/:job_id", post(cancel_triage))
        .route("/triage/results/:job_id", get(get_triage_results))
}
