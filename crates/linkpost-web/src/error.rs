//! Error types for the HTTP surface.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use linkpost_scheduler::{SchedulerError, ValidationError};
use linkpost_voyager::VoyagerError;

/// Errors returned by request handlers.
///
/// Every variant renders as `{"status": "error", "message": …}`.
#[derive(Debug, Error)]
pub enum WebError {
    /// Malformed or incomplete request.
    #[error("{0}")]
    BadRequest(String),

    /// Submitted job rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Credentials were syntactically fine but rejected.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// The resource is in a state that forbids the operation.
    #[error("{0}")]
    Conflict(String),

    /// LinkedIn call failed.
    #[error(transparent)]
    Remote(#[from] VoyagerError),

    /// Job store failure.
    #[error("storage error: {0}")]
    Storage(SchedulerError),
}

impl From<SchedulerError> for WebError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Validation(e) => WebError::Validation(e),
            other => WebError::Storage(other),
        }
    }
}

impl From<JsonRejection> for WebError {
    fn from(rejection: JsonRejection) -> Self {
        WebError::BadRequest(rejection.body_text())
    }
}

impl WebError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::BadRequest(_) | WebError::Validation(_) => StatusCode::BAD_REQUEST,
            WebError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Conflict(_) => StatusCode::CONFLICT,
            WebError::Remote(e) if e.is_auth() => StatusCode::UNAUTHORIZED,
            WebError::Remote(VoyagerError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            WebError::Remote(_) => StatusCode::BAD_GATEWAY,
            WebError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = json!({
            "status": "error",
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
