//! Error types for the scheduler.

use thiserror::Error;

use linkpost_voyager::CredentialsError;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// SQLite error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The store connection lock was poisoned by a panicking holder.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Credentials could not be serialized for storage.
    #[error("failed to encode credentials: {0}")]
    Encode(#[from] serde_json::Error),

    /// Submitted job was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Dispatcher settings that would break at-most-once delivery.
    #[error("invalid dispatcher config: {0}")]
    InvalidConfig(String),
}

/// Reasons a job submission is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Credential bundle missing or incomplete.
    #[error("Missing LinkedIn cookies: {0}")]
    Credentials(#[from] CredentialsError),

    /// No credential bundle at all.
    #[error("Missing LinkedIn cookies.")]
    MissingCredentials,

    /// Post text missing or blank.
    #[error("Missing post text.")]
    EmptyText,

    /// Run time missing.
    #[error("Invalid run_at: missing run_at")]
    MissingRunAt,

    /// Run time present but unparseable.
    #[error("Invalid run_at: {0:?} is not an ISO-8601 timestamp")]
    InvalidRunAt(String),
}
