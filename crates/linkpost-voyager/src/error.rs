//! Error types for the Voyager client.

use thiserror::Error;

/// Errors that can occur when talking to Voyager.
#[derive(Debug, Error)]
pub enum VoyagerError {
    /// The session cookies were rejected.
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// The credentials cannot be sent as-is.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Unexpected response from Voyager.
    #[error("invalid response ({status}): {body}")]
    InvalidResponse { status: u16, body: String },
}

impl VoyagerError {
    /// Whether the error means the credentials themselves are bad.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            VoyagerError::Auth { .. } | VoyagerError::InvalidCredentials(_)
        )
    }
}
