//! The background dispatcher.
//!
//! Each tick fetches a bounded batch of due jobs, claims them one at a time,
//! and posts only the ones it won. A job whose claim fails was taken by a
//! concurrent tick or removed and is skipped silently.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use linkpost_voyager::{Credentials, PostingService, Visibility};

use crate::{DEFAULT_BATCH_LIMIT, JobOutcome, JobStore, ScheduledJob, SchedulerError};

/// Default time between ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on a single remote post.
pub const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(60);

/// How much longer than `post_timeout` a claim must sit before the stale
/// sweep may touch it. Covers the outcome write after a post returns.
pub const STALE_CLAIM_MARGIN: Duration = Duration::from_secs(30);

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sleep between the end of one tick and the start of the next.
    pub poll_interval: Duration,
    /// Maximum jobs taken per tick.
    pub batch_limit: usize,
    /// A post still running after this long is recorded as failed.
    pub post_timeout: Duration,
    /// When set, processing jobs claimed longer ago than this are failed at
    /// the start of every tick. Must exceed the post timeout of every
    /// dispatcher sharing the database by more than [`STALE_CLAIM_MARGIN`].
    pub stale_after: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_limit: DEFAULT_BATCH_LIMIT,
            post_timeout: DEFAULT_POST_TIMEOUT,
            stale_after: None,
        }
    }
}

impl DispatcherConfig {
    /// Reject settings under which the stale sweep could fail a post that
    /// is still in flight.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if let Some(stale_after) = self.stale_after {
            let floor = self.post_timeout.saturating_add(STALE_CLAIM_MARGIN);
            if stale_after <= floor {
                return Err(SchedulerError::InvalidConfig(format!(
                    "stale_after ({}s) must exceed post_timeout ({}s) by more than {}s",
                    stale_after.as_secs(),
                    self.post_timeout.as_secs(),
                    STALE_CLAIM_MARGIN.as_secs()
                )));
            }
        }

        if self.batch_limit == 0 {
            return Err(SchedulerError::InvalidConfig(
                "batch_limit must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Due jobs fetched.
    pub due: usize,
    /// Jobs posted and recorded as done.
    pub posted: usize,
    /// Jobs recorded as failed.
    pub failed: usize,
    /// Jobs whose claim was lost to someone else.
    pub lost: usize,
    /// Jobs executed whose outcome matched no processing row, e.g. because
    /// they were cleared mid-flight.
    pub unrecorded: usize,
    /// Stale processing jobs swept to failed.
    pub reclaimed: usize,
}

impl TickReport {
    fn is_idle(&self) -> bool {
        self.due == 0 && self.reclaimed == 0
    }
}

/// Executes due jobs against a posting service.
pub struct Dispatcher {
    store: Arc<JobStore>,
    service: Arc<dyn PostingService>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        service: Arc<dyn PostingService>,
        config: DispatcherConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            store,
            service,
            config,
        })
    }

    /// Run one pass over the due set.
    ///
    /// Remote failures are recorded per job and never abort the tick. A
    /// storage error aborts the tick; unclaimed jobs stay pending and are
    /// picked up on the next one.
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        self.tick_until(None).await
    }

    /// Like [`tick`](Self::tick), but stops before claiming another job once
    /// `shutdown_rx` reads `true`. The job in flight always finishes.
    #[tracing::instrument(skip_all)]
    async fn tick_until(
        &self,
        shutdown_rx: Option<&watch::Receiver<bool>>,
    ) -> Result<TickReport, SchedulerError> {
        let now = Utc::now();
        let mut report = TickReport::default();

        if let Some(cutoff) = self
            .config
            .stale_after
            .and_then(|age| TimeDelta::from_std(age).ok())
            .and_then(|age| now.checked_sub_signed(age))
        {
            report.reclaimed = self.store.reclaim_stale(cutoff)?;
        }

        let due = self.store.fetch_due(now, self.config.batch_limit)?;
        report.due = due.len();

        for (index, job) in due.into_iter().enumerate() {
            if shutdown_rx.is_some_and(|rx| *rx.borrow()) {
                info!(
                    remaining = report.due - index,
                    "shutdown requested, leaving remaining posts pending"
                );
                break;
            }

            if !self.store.claim(job.id)? {
                debug!(id = job.id, "job already claimed, skipping");
                report.lost += 1;
                continue;
            }

            let outcome = self.execute(&job).await;

            if !self.store.mark_outcome(job.id, &outcome)? {
                warn!(id = job.id, outcome = %outcome.status(), "job vanished while in flight");
                report.unrecorded += 1;
                continue;
            }

            match outcome {
                JobOutcome::Done => report.posted += 1,
                JobOutcome::Failed(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Post a claimed job and decide its outcome.
    async fn execute(&self, job: &ScheduledJob) -> JobOutcome {
        let credentials = match Credentials::from_stored(&job.credentials) {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(id = job.id, error = %e, "stored credentials unreadable");
                return JobOutcome::Failed(format!("invalid stored credentials: {}", e));
            }
        };

        info!(id = job.id, run_at = %job.run_at, "posting scheduled post");

        match timeout(
            self.config.post_timeout,
            self.service
                .create_post(&credentials, &job.text, Visibility::Anyone),
        )
        .await
        {
            Ok(Ok(receipt)) => {
                info!(id = job.id, post_url = ?receipt.post_url, "scheduled post published");
                JobOutcome::Done
            }
            Ok(Err(e)) => {
                warn!(id = job.id, error = %e, "scheduled post failed");
                JobOutcome::Failed(e.to_string())
            }
            Err(_) => {
                let secs = self.config.post_timeout.as_secs();
                warn!(id = job.id, timeout_secs = secs, "scheduled post timed out");
                JobOutcome::Failed(format!("timed out after {}s", secs))
            }
        }
    }

    /// Tick until `shutdown_rx` flips to `true`.
    ///
    /// The first tick runs immediately; afterwards the loop sleeps for the
    /// poll interval after each tick completes, so ticks never overlap.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_limit = self.config.batch_limit,
            "dispatcher starting"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.tick_until(Some(&shutdown_rx)).await {
                Ok(report) if report.is_idle() => debug!("no due posts"),
                Ok(report) => info!(
                    due = report.due,
                    posted = report.posted,
                    failed = report.failed,
                    lost = report.lost,
                    unrecorded = report.unrecorded,
                    reclaimed = report.reclaimed,
                    "dispatch tick complete"
                ),
                Err(e) => error!(error = %e, "dispatch tick failed"),
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped
                        break;
                    }
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        info!("dispatcher shut down gracefully");
    }

    /// Spawn the run loop on the current runtime.
    pub fn start(self: Arc<Self>) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });
        DispatcherHandle { shutdown_tx, task }
    }
}

/// A running dispatcher.
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Signal shutdown and wait for the post in flight, if any, to be
    /// recorded. Jobs not yet claimed stay pending.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "dispatcher task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobStatus, NewJob};
    use async_trait::async_trait;
    use linkpost_voyager::{PostReceipt, Profile, VoyagerError};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        RateLimit,
        Hang,
        Slow(Duration),
    }

    struct FakeService {
        behavior: Behavior,
        posts: AtomicUsize,
    }

    impl FakeService {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                posts: AtomicUsize::new(0),
            })
        }

        fn posts(&self) -> usize {
            self.posts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PostingService for FakeService {
        async fn create_post(
            &self,
            _credentials: &Credentials,
            _text: &str,
            _visibility: Visibility,
        ) -> Result<PostReceipt, VoyagerError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            // Give concurrent ticks a chance to interleave
            tokio::task::yield_now().await;

            let receipt = PostReceipt {
                post_url: Some("https://www.linkedin.com/feed/update/urn:li:share:1".into()),
            };
            match self.behavior {
                Behavior::Succeed => Ok(receipt),
                Behavior::RateLimit => Err(VoyagerError::RateLimited {
                    retry_after_secs: Some(60),
                }),
                Behavior::Hang => std::future::pending().await,
                Behavior::Slow(delay) => {
                    sleep(delay).await;
                    Ok(receipt)
                }
            }
        }

        async fn get_profile(&self, _credentials: &Credentials) -> Result<Profile, VoyagerError> {
            Ok(Profile::default())
        }
    }

    /// Deletes every job while the post is in flight.
    struct ClearingService {
        store: Arc<JobStore>,
    }

    #[async_trait]
    impl PostingService for ClearingService {
        async fn create_post(
            &self,
            _credentials: &Credentials,
            _text: &str,
            _visibility: Visibility,
        ) -> Result<PostReceipt, VoyagerError> {
            self.store.clear_all().unwrap();
            Ok(PostReceipt::default())
        }

        async fn get_profile(&self, _credentials: &Credentials) -> Result<Profile, VoyagerError> {
            Ok(Profile::default())
        }
    }

    fn new_job(text: &str, minutes_ago: i64) -> NewJob {
        NewJob {
            text: text.to_string(),
            run_at: Utc::now() - TimeDelta::minutes(minutes_ago),
            credentials: Credentials::new("session", "\"ajax:1\"").unwrap(),
        }
    }

    fn dispatcher(store: Arc<JobStore>, service: Arc<FakeService>) -> Dispatcher {
        Dispatcher::new(store, service, DispatcherConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_due_job_is_posted_once() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let service = FakeService::new(Behavior::Succeed);
        let id = store.insert(&new_job("hello", 5)).unwrap();
        let future = store.insert(&new_job("later", -60)).unwrap();

        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&service));
        let report = dispatcher.tick().await.unwrap();

        assert_eq!(
            report,
            TickReport {
                due: 1,
                posted: 1,
                ..Default::default()
            }
        );
        assert_eq!(store.get(id).unwrap().unwrap().status, JobStatus::Done);
        assert_eq!(store.get(future).unwrap().unwrap().status, JobStatus::Pending);

        // Done jobs are never picked up again
        let report = dispatcher.tick().await.unwrap();
        assert_eq!(report.due, 0);
        assert_eq!(service.posts(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_is_recorded() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let service = FakeService::new(Behavior::RateLimit);
        let id = store.insert(&new_job("hello", 1)).unwrap();

        let report = dispatcher(Arc::clone(&store), Arc::clone(&service))
            .tick()
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("rate limited (retry after 60s)"));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(dir.path().join("schedule.db")).unwrap());
        let service = FakeService::new(Behavior::Succeed);

        let good = store.insert(&new_job("good", 2)).unwrap();
        let bad = store.insert(&new_job("bad", 3)).unwrap();

        // Corrupt the stored credentials of one job through a second connection
        let conn = rusqlite::Connection::open(dir.path().join("schedule.db")).unwrap();
        conn.execute(
            "UPDATE scheduled_posts SET cookies_json = '{not json' WHERE id = ?1",
            [bad],
        )
        .unwrap();

        let report = dispatcher(Arc::clone(&store), Arc::clone(&service))
            .tick()
            .await
            .unwrap();

        assert_eq!(report.posted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(service.posts(), 1);

        assert_eq!(store.get(good).unwrap().unwrap().status, JobStatus::Done);
        let bad = store.get(bad).unwrap().unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert!(bad.last_error.unwrap().starts_with("invalid stored credentials"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_post_times_out() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let service = FakeService::new(Behavior::Hang);
        let id = store.insert(&new_job("hello", 1)).unwrap();

        let config = DispatcherConfig {
            post_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let report = Dispatcher::new(Arc::clone(&store), service, config)
            .unwrap()
            .tick()
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("timed out after 5s"));
    }

    #[tokio::test]
    async fn test_batch_limit() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let service = FakeService::new(Behavior::Succeed);
        for i in 0..30 {
            store.insert(&new_job("post", 60 - i)).unwrap();
        }

        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&service));
        let first = dispatcher.tick().await.unwrap();
        assert_eq!(first.posted, DEFAULT_BATCH_LIMIT);

        let second = dispatcher.tick().await.unwrap();
        assert_eq!(second.posted, 30 - DEFAULT_BATCH_LIMIT);
        assert_eq!(service.posts(), 30);
    }

    #[tokio::test]
    async fn test_concurrent_dispatchers_post_each_job_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.db");
        let service = FakeService::new(Behavior::Succeed);

        let seed = JobStore::open(&path).unwrap();
        for i in 0..10 {
            seed.insert(&new_job("post", 10 - i)).unwrap();
        }

        let a = dispatcher(Arc::new(JobStore::open(&path).unwrap()), Arc::clone(&service));
        let b = dispatcher(Arc::new(JobStore::open(&path).unwrap()), Arc::clone(&service));

        let (ra, rb) = tokio::join!(a.tick(), b.tick());
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(service.posts(), 10);
        assert_eq!(ra.posted + rb.posted, 10);
        assert_eq!(ra.lost + rb.lost, ra.due + rb.due - 10);
        assert!(
            seed.list(100)
                .unwrap()
                .iter()
                .all(|job| job.status == JobStatus::Done)
        );
    }

    #[tokio::test]
    async fn test_already_claimed_job_is_skipped() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let service = FakeService::new(Behavior::Succeed);
        let id = store.insert(&new_job("hello", 1)).unwrap();

        // Claimed elsewhere before this tick runs
        assert!(store.claim(id).unwrap());

        let report = dispatcher(Arc::clone(&store), Arc::clone(&service))
            .tick()
            .await
            .unwrap();

        assert_eq!(report, TickReport::default());
        assert_eq!(service.posts(), 0);
    }

    #[tokio::test]
    async fn test_cleared_mid_flight_is_not_counted() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        store.insert(&new_job("hello", 1)).unwrap();

        let service = Arc::new(ClearingService {
            store: Arc::clone(&store),
        });
        let report = Dispatcher::new(Arc::clone(&store), service, DispatcherConfig::default())
            .unwrap()
            .tick()
            .await
            .unwrap();

        assert_eq!(
            report,
            TickReport {
                due: 1,
                unrecorded: 1,
                ..Default::default()
            }
        );
        assert!(store.list(10).unwrap().is_empty());
    }

    #[test]
    fn test_stale_window_must_outlast_post_timeout() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let config = |stale_secs: u64| DispatcherConfig {
            post_timeout: Duration::from_secs(60),
            stale_after: Some(Duration::from_secs(stale_secs)),
            ..Default::default()
        };

        for stale_secs in [0, 30, 60, 90] {
            let err = Dispatcher::new(
                Arc::clone(&store),
                FakeService::new(Behavior::Succeed),
                config(stale_secs),
            )
            .err()
            .unwrap();
            assert!(matches!(err, SchedulerError::InvalidConfig(_)));
        }

        assert!(config(91).validate().is_ok());
        assert!(DispatcherConfig::default().validate().is_ok());

        let no_batch = DispatcherConfig {
            batch_limit: 0,
            ..Default::default()
        };
        assert!(no_batch.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_spares_post_in_flight_on_another_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.db");

        let seed = JobStore::open(&path).unwrap();
        let id = seed.insert(&new_job("hello", 1)).unwrap();

        let slow = FakeService::new(Behavior::Slow(Duration::from_secs(20)));
        let poster = Dispatcher::new(
            Arc::new(JobStore::open(&path).unwrap()),
            slow.clone(),
            DispatcherConfig {
                post_timeout: Duration::from_secs(30),
                ..Default::default()
            },
        )
        .unwrap();

        let sweeper_service = FakeService::new(Behavior::Succeed);
        let sweeper = Dispatcher::new(
            Arc::new(JobStore::open(&path).unwrap()),
            sweeper_service.clone(),
            DispatcherConfig {
                post_timeout: Duration::from_secs(30),
                stale_after: Some(Duration::from_secs(61)),
                ..Default::default()
            },
        )
        .unwrap();

        let (posted, swept) = tokio::join!(poster.tick(), async {
            sleep(Duration::from_secs(5)).await;
            sweeper.tick().await
        });
        let (posted, swept) = (posted.unwrap(), swept.unwrap());

        assert_eq!(posted.posted, 1);
        assert_eq!(swept, TickReport::default());
        assert_eq!(slow.posts() + sweeper_service.posts(), 1);

        let job = seed.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.last_error, None);
    }

    #[tokio::test]
    async fn test_stale_claims_are_failed_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.db");
        let store = Arc::new(JobStore::open(&path).unwrap());
        let service = FakeService::new(Behavior::Succeed);
        let id = store.insert(&new_job("hello", 10)).unwrap();
        store.claim(id).unwrap();

        // Pretend the claim was taken long ago by a process that died
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE scheduled_posts SET claimed_at = '2000-01-01T00:00:00+00:00' WHERE id = ?1",
            [id],
        )
        .unwrap();

        let config = DispatcherConfig {
            stale_after: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        let report = Dispatcher::new(Arc::clone(&store), service.clone(), config)
            .unwrap()
            .tick()
            .await
            .unwrap();

        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.due, 0);
        assert_eq!(service.posts(), 0);
        assert_eq!(store.get(id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_ticks_until_stopped() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let service = FakeService::new(Behavior::Succeed);
        store.insert(&new_job("first", 1)).unwrap();

        let handle = Arc::new(dispatcher(Arc::clone(&store), Arc::clone(&service))).start();

        // First tick runs immediately
        sleep(Duration::from_secs(1)).await;
        assert_eq!(service.posts(), 1);

        // Picked up on the following tick
        store.insert(&new_job("second", 0)).unwrap();
        sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(service.posts(), 2);

        handle.stop().await;

        store.insert(&new_job("third", 0)).unwrap();
        sleep(DEFAULT_POLL_INTERVAL * 2).await;
        assert_eq!(service.posts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_unclaimed_jobs_pending() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let service = FakeService::new(Behavior::Slow(Duration::from_secs(50)));
        for i in 0..5 {
            store.insert(&new_job("post", 10 - i)).unwrap();
        }

        let handle = Arc::new(dispatcher(Arc::clone(&store), Arc::clone(&service))).start();
        sleep(Duration::from_secs(1)).await;

        let stopping = tokio::time::Instant::now();
        handle.stop().await;

        // Only the post already in flight is waited for
        assert!(stopping.elapsed() <= Duration::from_secs(50));
        assert_eq!(service.posts(), 1);

        let jobs = store.list(10).unwrap();
        let done = jobs.iter().filter(|j| j.status == JobStatus::Done).count();
        let pending = jobs.iter().filter(|j| j.status == JobStatus::Pending).count();
        assert_eq!((done, pending), (1, 4));
    }
}
