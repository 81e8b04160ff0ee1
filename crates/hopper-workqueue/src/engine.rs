//! Job queue engine: enqueue API, poll loop and lifecycle.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hopper_config::QueueConfig;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::error::{JobError, QueueError};
use crate::handler::{HandlerRegistry, JobHandler};
use crate::health::QueueHealth;
use crate::job::{EnqueueOptions, Job};
use crate::stats::{stats_window, JobStats};
use crate::store::JobStore;
use crate::worker::WorkerPool;

/// Error message recorded on jobs cancelled through [`JobQueue::cancel_job`].
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Error message recorded on jobs recovered from a stalled `processing` state.
pub const ABANDONED: &str = "Job abandoned: still processing after the stale timeout";

struct PollLoop {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Durable job queue engine.
///
/// Jobs are persisted through a [`JobStore`]; a single poll loop per engine
/// claims eligible jobs and hands them to the worker pool. Several engines
/// may share one store.
pub struct JobQueue {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    workers: Arc<WorkerPool>,
    wake: Arc<Notify>,
    running: Arc<AtomicBool>,
    last_poll_ms: Arc<AtomicI64>,
    poll_loop: Mutex<Option<PollLoop>>,
}

impl JobQueue {
    /// Create an engine using the backoff table from `config`.
    pub fn new(config: QueueConfig, store: Arc<dyn JobStore>) -> Self {
        let backoff = BackoffPolicy::new(config.backoff());
        Self::with_backoff(config, store, backoff)
    }

    /// Create an engine with an explicit backoff policy.
    pub fn with_backoff(config: QueueConfig, store: Arc<dyn JobStore>, backoff: BackoffPolicy) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let wake = Arc::new(Notify::new());
        let workers = Arc::new(WorkerPool::new(
            store.clone(),
            registry.clone(),
            backoff,
            config.job_timeout(),
            config.max_workers,
            wake.clone(),
        ));

        Self {
            config,
            store,
            registry,
            workers,
            wake,
            running: Arc::new(AtomicBool::new(false)),
            last_poll_ms: Arc::new(AtomicI64::new(0)),
            poll_loop: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Persist a new job. It becomes claimable once `scheduled_at` elapses.
    pub async fn enqueue(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(QueueError::InvalidJob("job_type cannot be empty".to_string()));
        }

        let job = Job::new(job_type, payload)
            .with_priority(options.priority.unwrap_or(self.config.default_priority))
            .with_max_retries(options.max_retries.unwrap_or(self.config.default_max_retries));
        let job = match options.scheduled_at {
            Some(at) => job.with_scheduled_at(at),
            None => job,
        };

        self.store.insert(&job).await?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            scheduled_at = %job.scheduled_at,
            "Job enqueued"
        );

        self.wake.notify_one();
        Ok(job.id)
    }

    /// Register a handler for `job_type`. A later registration replaces it.
    pub fn register_handler<H>(&self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        self.registry.register(job_type, Arc::new(handler), None);
    }

    /// Register a handler with its own execution deadline.
    pub fn register_handler_with_timeout<H>(&self, job_type: impl Into<String>, handler: H, timeout: Duration)
    where
        H: JobHandler + 'static,
    {
        self.registry.register(job_type, Arc::new(handler), Some(timeout));
    }

    /// Job types from `expected` that have no registered handler.
    pub fn missing_handlers<'a, I>(&self, expected: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.registry.missing(expected)
    }

    /// Start the poll loop. Calling it on a running engine only logs a warning.
    pub async fn start(&self) -> Result<(), QueueError> {
        let mut poll_loop = self.poll_loop.lock().await;
        if poll_loop.is_some() {
            warn!("Job queue is already running");
            return Ok(());
        }

        self.recover_stalled().await?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_poll_loop(
            self.workers.clone(),
            self.wake.clone(),
            self.last_poll_ms.clone(),
            shutdown.clone(),
            self.config.poll_interval(),
            self.config.batch_size as usize,
        ));

        *poll_loop = Some(PollLoop { shutdown, handle });
        self.running.store(true, Ordering::SeqCst);

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            max_workers = self.config.max_workers,
            "Job queue started"
        );
        Ok(())
    }

    /// Stop the poll loop and wait for in-flight jobs up to the shutdown grace.
    ///
    /// Calling it on a stopped engine only logs a warning.
    pub async fn stop(&self) {
        let Some(PollLoop { shutdown, handle }) = self.poll_loop.lock().await.take() else {
            warn!("Job queue is not running");
            return;
        };

        shutdown.cancel();
        if let Err(e) = handle.await {
            error!("Poll loop terminated abnormally: {}", e);
        }
        self.running.store(false, Ordering::SeqCst);

        let grace = self.config.shutdown_grace();
        if !self.workers.wait_idle(grace).await {
            warn!("Jobs still running after {:?}; their outcome is recorded when they finish", grace);
        }
        info!("Job queue stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        self.store.get(id).await
    }

    /// Cancel a pending job. Returns false if it is unknown or already claimed.
    pub async fn cancel_job(&self, id: Uuid) -> Result<bool, QueueError> {
        let cancelled = self.store.cancel_pending(id, CANCELLED_BY_USER, Utc::now()).await?;
        if cancelled {
            info!(job_id = %id, "Job cancelled");
        } else {
            debug!(job_id = %id, "Job not cancelled; not pending");
        }
        Ok(cancelled)
    }

    /// Per-status counts and mean durations over the trailing 24 hours.
    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        self.store.status_stats(Utc::now() - stats_window()).await
    }

    /// Time of the last poll cycle run by the loop.
    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        match self.last_poll_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Store reachability plus liveness of the poll loop.
    pub async fn health(&self) -> QueueHealth {
        let store_reachable = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Job store health check failed: {}", e);
                false
            }
        };

        let last_poll_at = self.last_poll_at();
        let stale_after = chrono::Duration::from_std(self.config.poll_interval() * 3)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let loop_alive = last_poll_at.is_some_and(|at| Utc::now() - at <= stale_after);

        QueueHealth::new(store_reachable, self.is_running() && loop_alive, last_poll_at)
    }

    /// Run one claim-and-dispatch cycle now and wait for the claimed jobs.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        self.poll_at(Utc::now()).await
    }

    /// Run one cycle treating `now` as the current time, and wait for the
    /// claimed jobs. Returns how many jobs were claimed.
    pub async fn poll_at(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let handles = self
            .workers
            .claim_and_dispatch(now, self.config.batch_size as usize)
            .await?;
        let claimed = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Job task failed: {}", e);
            }
        }
        Ok(claimed)
    }

    /// Treat jobs stuck in `processing` past the stale timeout as failed
    /// attempts, sending them to `retry` or `failed`.
    ///
    /// Only jobs whose handler runs under a deadline shorter than the stale
    /// timeout are recovered; without one a live claim held by another engine
    /// cannot be told apart from an abandoned one.
    pub async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let stale_after = self.config.stale_after();
        let cutoff = now - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());
        let stalled = self.store.find_stalled(cutoff).await?;

        let mut recovered = 0;
        for job in &stalled {
            match self.workers.deadline_for(&job.job_type) {
                Some(deadline) if deadline < stale_after => {}
                deadline => {
                    warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        ?deadline,
                        "Stalled job left in processing; no deadline shorter than the stale timeout"
                    );
                    continue;
                }
            }
            warn!(job_id = %job.id, job_type = %job.job_type, "Recovering stalled job");
            self.workers
                .record(job, Err(JobError::retryable(ABANDONED)), now)
                .await;
            recovered += 1;
        }
        if recovered > 0 {
            info!(count = recovered, "Recovered stalled jobs");
        }
        Ok(recovered)
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if let Some(poll_loop) = self.poll_loop.get_mut().take() {
            poll_loop.shutdown.cancel();
        }
    }
}

async fn run_poll_loop(
    workers: Arc<WorkerPool>,
    wake: Arc<Notify>,
    last_poll_ms: Arc<AtomicI64>,
    shutdown: CancellationToken,
    interval: Duration,
    batch_size: usize,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }

        let now = Utc::now();
        last_poll_ms.store(now.timestamp_millis(), Ordering::SeqCst);

        // Spawned jobs run on; the loop never waits for them.
        if let Err(e) = workers.claim_and_dispatch(now, batch_size).await {
            error!("Poll cycle failed: {}", e);
        }
    }

    debug!("Poll loop exited");
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
