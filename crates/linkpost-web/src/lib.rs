//! HTTP surface for linkpost.
//!
//! This crate provides:
//! - Scheduling, listing and requeueing of scheduled posts
//! - Immediate posting and credential verification against LinkedIn
//! - A JSON error envelope shared by every endpoint

mod error;
mod extract;
mod routes;

pub use error::WebError;
pub use routes::{AppState, create_router};
