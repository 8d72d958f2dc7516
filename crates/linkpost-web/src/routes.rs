//! HTTP routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use linkpost_scheduler::timestamp::{format_timestamp, parse_run_at};
use linkpost_scheduler::{JobStore, SubmitRequest, ValidationError, parse_credentials, submit};
use linkpost_voyager::{PostingService, Visibility};

use crate::WebError;
use crate::extract::AppJson;

/// Jobs returned by the listing endpoint when no limit is given.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Upper bound on the listing limit.
const MAX_LIST_LIMIT: usize = 500;

/// Shared application state.
pub struct AppState {
    pub store: Arc<JobStore>,
    pub service: Arc<dyn PostingService>,
}

/// Create the HTTP router.
///
/// CORS is fully permissive: callers are browser extensions and pages on
/// arbitrary origins.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/schedule-post", post(schedule_post))
        .route("/clear-scheduled", post(clear_scheduled))
        .route("/post-to-linkedin", post(post_to_linkedin))
        .route("/verify-cookies", post(verify_cookies))
        .route("/get-profile", post(get_profile))
        .route("/scheduled-posts", get(list_scheduled))
        .route("/scheduled-posts/{id}", get(get_scheduled))
        .route("/scheduled-posts/{id}/requeue", post(requeue_scheduled))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Body for endpoints that act on a user's session right away.
#[derive(Debug, Default, Deserialize)]
struct SessionRequest {
    #[serde(default, alias = "cookies")]
    credentials: Option<Value>,
    #[serde(default)]
    text: Option<String>,
    /// Audience for immediate posts; scheduled posts always go to anyone.
    #[serde(default)]
    visibility: Visibility,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RequeueRequest {
    #[serde(default)]
    run_at: Option<String>,
}

async fn schedule_post(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<SubmitRequest>,
) -> Result<Json<Value>, WebError> {
    let submitted = submit(&state.store, &request)?;

    Ok(Json(json!({
        "status": "success",
        "id": submitted.id,
        "run_at": submitted.run_at,
        "message": "Post scheduled.",
    })))
}

async fn clear_scheduled(State(state): State<Arc<AppState>>) -> Result<Json<Value>, WebError> {
    let cleared = state.store.clear_all()?;

    Ok(Json(json!({
        "status": "success",
        "message": "Cleared scheduled posts.",
        "cleared": cleared,
    })))
}

async fn post_to_linkedin(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<SessionRequest>,
) -> Result<Json<Value>, WebError> {
    let credentials = parse_credentials(request.credentials.as_ref())?;
    let text = request
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ValidationError::EmptyText)?;

    let receipt = state
        .service
        .create_post(&credentials, text, request.visibility)
        .await?;
    info!(post_url = ?receipt.post_url, "posted immediately");

    Ok(Json(json!({
        "status": "success",
        "message": "Post created successfully!",
        "post_url": receipt.post_url.unwrap_or_default(),
    })))
}

async fn verify_cookies(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<SessionRequest>,
) -> Result<Json<Value>, WebError> {
    let credentials = parse_credentials(request.credentials.as_ref())?;
    let profile = state.service.get_profile(&credentials).await?;

    if !profile.is_authenticated() {
        return Err(WebError::Unauthorized("Invalid cookies.".to_string()));
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Cookies are valid",
        "profile": profile,
    })))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<SessionRequest>,
) -> Result<Json<Value>, WebError> {
    let credentials = parse_credentials(request.credentials.as_ref())?;
    let profile = state.service.get_profile(&credentials).await?;

    Ok(Json(json!({
        "status": "success",
        "profile": profile,
    })))
}

async fn list_scheduled(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, WebError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs = state.store.list(limit)?;
    debug!(count = jobs.len(), "listed scheduled posts");

    Ok(Json(json!({
        "status": "success",
        "jobs": jobs,
    })))
}

async fn get_scheduled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, WebError> {
    let job = state
        .store
        .get(id)?
        .ok_or_else(|| WebError::NotFound(format!("Scheduled post {} not found.", id)))?;

    Ok(Json(json!({
        "status": "success",
        "job": job,
    })))
}

async fn requeue_scheduled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<Value>, WebError> {
    // The body is optional; an empty one means "run now"
    let request: RequeueRequest = if body.is_empty() {
        RequeueRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| WebError::BadRequest(format!("Invalid request body: {}", e)))?
    };
    let run_at = match request.run_at.as_deref() {
        Some(raw) => parse_run_at(raw)?,
        None => Utc::now(),
    };

    if !state.store.requeue(id, run_at)? {
        return Err(match state.store.get(id)? {
            None => WebError::NotFound(format!("Scheduled post {} not found.", id)),
            Some(job) => WebError::Conflict(format!(
                "Scheduled post {} is {}; only failed posts can be requeued.",
                id, job.status
            )),
        });
    }

    Ok(Json(json!({
        "status": "success",
        "id": id,
        "run_at": format_timestamp(run_at),
    })))
}

/// Liveness check.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
