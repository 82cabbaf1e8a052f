//! Error types for sift-triage
//!
//! `TriageError` is the domain error raised by the grid pipeline, scorer and
//! job state machine. `ApiError` maps both onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::vision_client::ModelError;

/// Triage pipeline errors
#[derive(Debug, Error)]
pub enum TriageError {
    /// A source image could not be decoded while building a grid
    #[error("Failed to decode image {image_id} ({path}): {reason}")]
    ImageDecode {
        image_id: String,
        path: String,
        reason: String,
    },

    /// Model response contained no usable grid coordinate
    #[error("No grid coordinates found in model response")]
    NoCoordinatesFound,

    /// Every model queried for a grid failed
    #[error("All models failed for grid {grid_index}: {}", .failures.join("; "))]
    AllModelsFailed {
        grid_index: usize,
        failures: Vec<String>,
    },

    /// Scorer weights do not sum to 1.0
    #[error("Invalid weight configuration: {0}")]
    InvalidWeightConfig(String),

    /// Job is past its retention window
    #[error("Triage job {0} has expired")]
    JobExpired(Uuid),

    /// Requested status/phase change is not a forward move
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Compare-and-swap on the job row lost against a concurrent writer
    #[error("Triage job {0} was modified concurrently")]
    TransitionConflict(Uuid),

    /// Too many grids in a pass produced no selection
    #[error("{pass} pass failed: {failed} of {total} grids failed")]
    PassFailed {
        pass: String,
        failed: u64,
        total: u64,
    },

    /// Composite scoring could not produce a category score
    #[error("Scoring failed: {0}")]
    ScoringFailed(String),

    /// Scheduling another grid would exceed `max_api_calls`
    #[error("API call budget exhausted ({used} of {limit} calls used)")]
    BudgetExhausted { used: u64, limit: u64 },

    /// Remote model error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// sift-common error (database, IO, config)
    #[error(transparent)]
    Common(#[from] sift_common::Error),
}

impl From<sqlx::Error> for TriageError {
    fn from(err: sqlx::Error) -> Self {
        TriageError::Common(sift_common::Error::Database(err))
    }
}

impl From<std::io::Error> for TriageError {
    fn from(err: std::io::Error) -> Self {
        TriageError::Common(sift_common::Error::Io(err))
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., results requested before completion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource existed but has expired (410)
    #[error("Gone: {0}")]
    Gone(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// sift-common error
    #[error("Common error: {0}")]
    Common(#[from] sift_common::Error),
}

impl From<TriageError> for ApiError {
    fn from(err: TriageError) -> Self {
        match err {
            TriageError::JobExpired(_) => ApiError::Gone(err.to_string()),
            TriageError::InvalidWeightConfig(_)
            | TriageError::InvalidTransition { .. }
            | TriageError::ImageDecode { .. } => ApiError::BadRequest(err.to_string()),
            TriageError::TransitionConflict(_) => ApiError::Conflict(err.to_string()),
            TriageError::Common(common) => ApiError::Common(common),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Gone(msg) => (StatusCode::GONE, "GONE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => match err {
                sift_common::Error::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                sift_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for triage pipeline operations
pub type TriageResult<T> = Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_job_maps_to_gone() {
        let response = ApiError::from(TriageError::JobExpired(Uuid::nil())).into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[test]
    fn test_common_not_found_maps_to_404() {
        let err = ApiError::from(TriageError::Common(sift_common::Error::NotFound(
            "job".to_string(),
        )));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_budget_message_is_explicit() {
        let err = TriageError::BudgetExhausted { used: 4, limit: 5 };
        assert!(err.to_string().starts_with("API call budget exhausted"));
    }
}
