//! Request extractors.

use axum::extract::FromRequest;

use crate::WebError;

/// `Json` whose rejections render through [`WebError`], so malformed bodies
/// get the same envelope as every other client error.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(WebError))]
pub(crate) struct AppJson<T>(pub T);
