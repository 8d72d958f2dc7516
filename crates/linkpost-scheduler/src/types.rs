//! Scheduler types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use linkpost_voyager::Credentials;

use crate::timestamp;

/// Lifecycle state of a scheduled job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its run time.
    #[default]
    Pending,
    /// Claimed by a dispatcher; the post is in flight.
    Processing,
    /// Posted successfully. Never executed again.
    Done,
    /// Posting failed. Terminal until an operator requeues it.
    Failed,
}

impl JobStatus {
    /// The value stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status column held a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A job as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub id: i64,
    #[serde(serialize_with = "timestamp::serialize")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "timestamp::serialize")]
    pub run_at: DateTime<Utc>,
    pub status: JobStatus,
    pub text: String,
    /// Stored credential JSON. Decoded only at execution time and never
    /// echoed back to clients.
    #[serde(skip_serializing)]
    pub credentials: String,
    /// Last failure detail; present only when failed.
    pub last_error: Option<String>,
    /// When the job was claimed, if it has been.
    #[serde(serialize_with = "timestamp::serialize_opt")]
    pub claimed_at: Option<DateTime<Utc>>,
}

/// A job to be inserted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub text: String,
    pub run_at: DateTime<Utc>,
    pub credentials: Credentials,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The post went out.
    Done,
    /// The post did not go out.
    Failed(String),
}

impl JobOutcome {
    /// Status this outcome moves a job to.
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Done => JobStatus::Done,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.to_string())
            );
        }
        assert_eq!(
            "running".parse::<JobStatus>(),
            Err(UnknownStatus("running".to_string()))
        );
    }

    #[test]
    fn test_serialized_job_hides_credentials() {
        let now = Utc::now();
        let job = ScheduledJob {
            id: 7,
            created_at: now,
            run_at: now,
            status: JobStatus::Failed,
            text: "hello".to_string(),
            credentials: r#"{"li_at":"secret","JSESSIONID":"secret"}"#.to_string(),
            last_error: Some("boom".to_string()),
            claimed_at: Some(now),
        };

        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains(r#""status":"failed""#));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["run_at"].as_str().unwrap().ends_with("+00:00"));
    }
}
