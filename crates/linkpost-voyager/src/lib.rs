//! Client for LinkedIn's internal Voyager API.
//!
//! This crate provides:
//! - [`Credentials`]: the minimal cookie pair needed to act as a user
//! - [`VoyagerClient`]: an HTTP client for posting and profile reads
//! - [`PostingService`]: the narrow interface the scheduler depends on

mod client;
mod credentials;
mod error;
mod service;
mod types;

pub use client::{DEFAULT_VOYAGER_URL, VoyagerClient};
pub use credentials::{Credentials, CredentialsError};
pub use error::VoyagerError;
pub use service::PostingService;
pub use types::{PostReceipt, Profile, Visibility};
