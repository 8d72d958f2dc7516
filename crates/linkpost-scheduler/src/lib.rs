//! Durable scheduled-post queue and dispatcher for linkpost.
//!
//! This crate provides:
//! - A SQLite-backed job store with compare-and-swap status transitions
//! - Validation and normalization for job submissions
//! - A dispatcher that claims due jobs and posts each one at most once

mod dispatcher;
mod error;
mod store;
mod submission;
pub mod timestamp;
mod types;

pub use dispatcher::{
    DEFAULT_POLL_INTERVAL, DEFAULT_POST_TIMEOUT, Dispatcher, DispatcherConfig, DispatcherHandle,
    STALE_CLAIM_MARGIN, TickReport,
};
pub use error::{SchedulerError, ValidationError};
pub use store::{DEFAULT_BATCH_LIMIT, JobStore};
pub use submission::{SubmitRequest, Submitted, parse_credentials, submit};
pub use types::{JobOutcome, JobStatus, NewJob, ScheduledJob, UnknownStatus};
