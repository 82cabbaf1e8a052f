//! Inference cache maintenance
//!
//! The cache is never invalidated implicitly; this is the only way to drop
//! entries.

use axum::{
    extract::{Query, State},
    routing::delete,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InvalidateQuery {
    /// Drop only this image's entries; everything when absent
    #[serde(default)]
    pub image_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

/// DELETE /cache[?image_id=...]
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Query(query): Query<InvalidateQuery>,
) -> ApiResult<Json<InvalidateResponse>> {
    let removed = match query.image_id.as_deref() {
        Some(image_id) => state.inference_cache.invalidate_image(image_id).await?,
        None => state.inference_cache.clear_all().await?,
    };

    tracing::info!(
        removed,
        image_id = query.image_id.as_deref().unwrap_or("*"),
        "Inference cache invalidated"
    );

    Ok(Json(InvalidateResponse {
        removed,
        image_id: query.image_id,
    }))
}

/// Build cache routes
pub fn cache_routes() -> Router<AppState> {
    Router::new().route("/cache", delete(invalidate_cache))
}
