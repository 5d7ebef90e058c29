use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_scheduler::SchedulerError;
use serde_json::json;
use tracing::error;

/// Handler error mapped onto an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request body has the wrong shape for its schedule kind.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Scheduler(e @ SchedulerError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, e.code(), e.to_string())
            }
            ApiError::Scheduler(e) if e.is_not_found() => {
                (StatusCode::NOT_FOUND, e.code(), e.to_string())
            }
            ApiError::Scheduler(e) => {
                error!(code = e.code(), "request failed: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.code(),
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
