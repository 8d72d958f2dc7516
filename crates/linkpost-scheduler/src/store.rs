//! SQLite-backed job store.
//!
//! Every state change is a single conditional `UPDATE` keyed on the current
//! status, so concurrent callers (request handlers, the dispatcher, or a
//! second dispatcher on the same database file) can never both win the same
//! transition. Nothing is cached in memory.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use crate::timestamp::{format_timestamp, parse_stored};
use crate::{JobOutcome, JobStatus, NewJob, ScheduledJob, SchedulerError, ValidationError};

/// Default number of due jobs handled per tick.
pub const DEFAULT_BATCH_LIMIT: usize = 25;

/// How long a writer waits for a competing connection's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Detail recorded when a stale claim is swept.
const INTERRUPTED_DETAIL: &str =
    "interrupted: claimed but no outcome was recorded before the claim went stale";

const SELECT_COLUMNS: &str =
    "SELECT id, created_at, run_at, status, text, cookies_json, last_error, claimed_at FROM scheduled_posts";

/// Durable store for scheduled posts.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        // WAL lets request handlers read while the dispatcher writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::init(conn)?;
        info!(path = %path.display(), "job store initialized");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, SchedulerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SchedulerError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scheduled_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                run_at TEXT NOT NULL,
                status TEXT NOT NULL,
                text TEXT NOT NULL,
                cookies_json TEXT NOT NULL,
                last_error TEXT,
                claimed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_posts_run ON scheduled_posts(status, run_at);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SchedulerError> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Insert a new pending job and return its id.
    #[tracing::instrument(skip(self, job), fields(run_at = %job.run_at))]
    pub fn insert(&self, job: &NewJob) -> Result<i64, SchedulerError> {
        if job.text.trim().is_empty() {
            return Err(ValidationError::EmptyText.into());
        }

        let cookies_json = job.credentials.to_stored()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduled_posts (created_at, run_at, status, text, cookies_json, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                format_timestamp(Utc::now()),
                format_timestamp(job.run_at),
                JobStatus::Pending.as_str(),
                job.text,
                cookies_json,
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!(id, "inserted scheduled post");
        Ok(id)
    }

    /// Pending jobs with `run_at <= now`, oldest run time first, at most `limit`.
    pub fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE status = ?1 AND run_at <= ?2
             ORDER BY run_at ASC, id ASC
             LIMIT ?3"
        ))?;

        let jobs = stmt
            .query_map(
                params![
                    JobStatus::Pending.as_str(),
                    format_timestamp(now),
                    i64::try_from(limit).unwrap_or(i64::MAX),
                ],
                row_to_job,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    /// Move a job from pending to processing.
    ///
    /// Returns `false` if the job is missing or no longer pending, i.e.
    /// someone else claimed it first.
    pub fn claim(&self, id: i64) -> Result<bool, SchedulerError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE scheduled_posts SET status = ?2, claimed_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![
                id,
                JobStatus::Processing.as_str(),
                format_timestamp(Utc::now()),
                JobStatus::Pending.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Record how an execution ended.
    ///
    /// Applies to processing jobs. Repeating the same outcome is a no-op
    /// that still returns `true`; a failure may overwrite an earlier failure
    /// detail. A done job is never moved to failed or back. Returns `false`
    /// if nothing matched.
    pub fn mark_outcome(&self, id: i64, outcome: &JobOutcome) -> Result<bool, SchedulerError> {
        let conn = self.conn()?;
        let target = outcome.status();
        let last_error = match outcome {
            JobOutcome::Done => None,
            JobOutcome::Failed(detail) => Some(detail.as_str()),
        };

        let changed = conn.execute(
            "UPDATE scheduled_posts SET status = ?2, last_error = ?3
             WHERE id = ?1 AND status IN (?4, ?2)",
            params![
                id,
                target.as_str(),
                last_error,
                JobStatus::Processing.as_str(),
            ],
        )?;

        if changed == 0 {
            warn!(id, outcome = %target, "outcome not recorded: job missing or not processing");
        }
        Ok(changed == 1)
    }

    /// Delete every job regardless of status. Returns the number removed.
    pub fn clear_all(&self) -> Result<usize, SchedulerError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM scheduled_posts", [])?;
        info!(removed, "cleared scheduled posts");
        Ok(removed)
    }

    /// Get a job by id.
    pub fn get(&self, id: i64) -> Result<Option<ScheduledJob>, SchedulerError> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Most recently created jobs first.
    pub fn list(&self, limit: usize) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
        let jobs = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Put a failed job back in the queue to run at `run_at`.
    ///
    /// Only failed jobs are eligible. Returns `false` otherwise.
    #[tracing::instrument(skip(self))]
    pub fn requeue(&self, id: i64, run_at: DateTime<Utc>) -> Result<bool, SchedulerError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE scheduled_posts
             SET status = ?2, run_at = ?3, last_error = NULL, claimed_at = NULL
             WHERE id = ?1 AND status = ?4",
            params![
                id,
                JobStatus::Pending.as_str(),
                format_timestamp(run_at),
                JobStatus::Failed.as_str(),
            ],
        )?;

        if changed == 1 {
            info!(id, "requeued failed post");
        }
        Ok(changed == 1)
    }

    /// Fail processing jobs claimed at or before `cutoff`.
    ///
    /// These jobs were abandoned mid-flight, e.g. by a crash. They are not
    /// re-executed because the post may already have gone out.
    pub fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let conn = self.conn()?;
        let swept = conn.execute(
            "UPDATE scheduled_posts SET status = ?1, last_error = ?2
             WHERE status = ?3 AND claimed_at IS NOT NULL AND claimed_at <= ?4",
            params![
                JobStatus::Failed.as_str(),
                INTERRUPTED_DETAIL,
                JobStatus::Processing.as_str(),
                format_timestamp(cutoff),
            ],
        )?;

        if swept > 0 {
            warn!(swept, cutoff = %cutoff, "failed stale processing posts");
        }
        Ok(swept)
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ScheduledJob> {
    let timestamp = |idx: usize| -> rusqlite::Result<DateTime<Utc>> {
        let raw: String = row.get(idx)?;
        parse_stored(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    };

    let status: String = row.get(3)?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let claimed_at = match row.get::<_, Option<String>>(7)? {
        Some(_) => Some(timestamp(7)?),
        None => None,
    };

    Ok(ScheduledJob {
        id: row.get(0)?,
        created_at: timestamp(1)?,
        run_at: timestamp(2)?,
        status,
        text: row.get(4)?,
        credentials: row.get(5)?,
        last_error: row.get(6)?,
        claimed_at,
    })
}
