//! Single-image scoring endpoint
//!
//! POST /score scores one photo with the configured composite scorer,
//! outside any triage job.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::db::settings::TriageSettings;
use crate::error::{ApiError, ApiResult};
use crate::models::ImageReference;
use crate::services::composite_scorer::{CompositeScorer, ScoreResult};
use crate::AppState;

/// POST /score request
#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub path: PathBuf,
}

/// POST /score response
#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub image: ImageReference,
    #[serde(flatten)]
    pub score: ScoreResult,
}

/// POST /score
///
/// **Errors:**
/// - 400: missing file, or invalid scorer weights
/// - 500: no vision model / scorer configured, or every model failed
pub async fn score_image(
    State(state): State<AppState>,
    Json(request): Json<ScoreRequest>,
) -> ApiResult<Json<ScoreResponse>> {
    if !request.path.is_file() {
        return Err(ApiError::BadRequest(format!(
            "Not a file: {}",
            request.path.display()
        )));
    }

    let settings = TriageSettings::load(&state.db).await?;
    let config = settings
        .scorer_config
        .clone()
        .ok_or_else(|| ApiError::Internal("scorer_config is not set".to_string()))?;
    let model = state.vision_model.clone().ok_or_else(|| {
        ApiError::Internal("Vision model not configured (set SIFT_VISION_API_KEY)".to_string())
    })?;

    // Weights are checked before anything is read or sent
    let scorer = CompositeScorer::new(
        config,
        model,
        Some(state.inference_cache.clone()),
        settings.model_call_timeout(),
    )?;

    let path = request.path.clone();
    let image = tokio::task::spawn_blocking(move || ImageReference::from_file(&path))
        .await
        .map_err(|e| ApiError::Internal(format!("Hashing task failed: {}", e)))??;

    let score = scorer.score(&image).await?;

    tracing::info!(
        image_id = %image.id,
        path = %image.path.display(),
        final_score = score.final_score,
        "Image scored"
    );

    Ok(Json(ScoreResponse { image, score }))
}

/// Build scoring routes
pub fn score_routes() -> Router<AppState> {
    Router::new().route("/score", post(score_image))
}
