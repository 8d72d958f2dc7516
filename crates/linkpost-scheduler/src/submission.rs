//! Validating and enqueueing scheduling requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use linkpost_voyager::Credentials;

use crate::timestamp::{format_timestamp, parse_run_at};
use crate::{JobStore, NewJob, SchedulerError, ValidationError};

/// A request to schedule a post, as received from a client.
///
/// Every field is optional at the wire level so that missing values surface
/// as validation errors rather than decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    /// Cookie bundle; only `li_at` and `JSESSIONID` are kept.
    #[serde(default, alias = "cookies")]
    pub credentials: Option<Value>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub run_at: Option<String>,
}

/// A successfully enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submitted {
    pub id: i64,
    /// Normalized UTC run time, in the stored encoding.
    pub run_at: String,
}

/// Extract the credential pair from an optional client-supplied bundle.
pub fn parse_credentials(bundle: Option<&Value>) -> Result<Credentials, ValidationError> {
    match bundle {
        None | Some(Value::Null) => Err(ValidationError::MissingCredentials),
        Some(bundle) => Ok(Credentials::from_bundle(bundle)?),
    }
}

/// Validate a request and insert it as a pending job.
///
/// Checks credentials, then text, then run time, and inserts nothing if any
/// check fails. Text is stored trimmed. A run time in the past is accepted
/// and becomes due on the next tick.
pub fn submit(store: &JobStore, request: &SubmitRequest) -> Result<Submitted, SchedulerError> {
    let credentials = parse_credentials(request.credentials.as_ref())?;

    let text = request
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ValidationError::EmptyText)?;

    let run_at = parse_run_at(request.run_at.as_deref().unwrap_or_default())?;

    let id = store.insert(&NewJob {
        text: text.to_string(),
        run_at,
        credentials,
    })?;

    let run_at = format_timestamp(run_at);
    info!(id, run_at = %run_at, "scheduled post");

    Ok(Submitted { id, run_at })
}
