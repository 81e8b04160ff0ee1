//! Worker pool: runs claimed jobs and records their outcome.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{JobError, QueueError};
use crate::handler::{HandlerRegistry, RegisteredHandler};
use crate::job::Job;
use crate::store::JobStore;

/// What the engine does with a job after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Retry {
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
    },
    Failed,
}

/// Decide the next state for a job whose attempt ended at `now`.
pub(crate) fn classify(
    job: &Job,
    result: &Result<(), JobError>,
    backoff: &BackoffPolicy,
    now: DateTime<Utc>,
) -> Outcome {
    match result {
        Ok(()) => Outcome::Completed,
        Err(e) if !e.is_retryable() || !job.can_retry() => Outcome::Failed,
        Err(_) => {
            let retry_count = job.retry_count + 1;
            Outcome::Retry {
                retry_count,
                scheduled_at: backoff.next_attempt_at(retry_count, now).max(job.scheduled_at),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Bounded pool that executes claimed jobs.
///
/// Each job runs on its own task holding a semaphore permit; the poll loop
/// only claims as many jobs as there are free permits.
pub(crate) struct WorkerPool {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    backoff: BackoffPolicy,
    default_timeout: Option<Duration>,
    semaphore: Arc<Semaphore>,
    max_workers: u32,
    wake: Arc<Notify>,
}

impl WorkerPool {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        backoff: BackoffPolicy,
        default_timeout: Option<Duration>,
        max_workers: u32,
        wake: Arc<Notify>,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            store,
            registry,
            backoff,
            default_timeout,
            semaphore: Arc::new(Semaphore::new(max_workers as usize)),
            max_workers,
            wake,
        }
    }

    pub(crate) fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Time limit a job of `job_type` runs under, if any.
    pub(crate) fn deadline_for(&self, job_type: &str) -> Option<Duration> {
        self.registry
            .get(job_type)
            .and_then(|registered| registered.timeout)
            .or(self.default_timeout)
    }

    /// Claim up to `batch_size` jobs (capped by free workers) and start them.
    pub(crate) async fn claim_and_dispatch(
        self: &Arc<Self>,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<JoinHandle<()>>, QueueError> {
        let limit = batch_size.min(self.available_workers());
        if limit == 0 {
            return Ok(Vec::new());
        }

        let jobs = self.store.claim_batch(now, limit).await?;
        if !jobs.is_empty() {
            debug!(count = jobs.len(), "Claimed jobs");
        }

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            // A concurrent manual poll can take the permit we counted on; the
            // job is already claimed, so wait for one rather than drop it.
            let permit = self.semaphore.clone().acquire_owned().await.ok();
            let pool = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                pool.execute(job).await;
            }));
        }
        Ok(handles)
    }

    async fn execute(&self, job: Job) {
        let claimed_at = job.started_at.unwrap_or_else(Utc::now);
        let started = Instant::now();

        debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.retry_count + 1, "Processing job");

        let result = match self.registry.get(&job.job_type) {
            Some(registered) => self.run_handler(registered, &job).await,
            None => Err(JobError::NoHandler(job.job_type.clone())),
        };

        let finished_at = claimed_at
            + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.record(&job, result, finished_at).await;
        self.wake.notify_one();
    }

    async fn run_handler(&self, registered: RegisteredHandler, job: &Job) -> Result<(), JobError> {
        let handler = registered.handler;
        let owned = job.clone();
        let mut task = tokio::spawn(async move { handler.handle(&owned).await });

        let joined = match registered.timeout.or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(JobError::Timeout(limit));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(JobError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(JobError::retryable(format!("Handler task cancelled: {}", e))),
        }
    }

    /// Persist the outcome of an attempt.
    pub(crate) async fn record(&self, job: &Job, result: Result<(), JobError>, now: DateTime<Utc>) {
        let outcome = classify(job, &result, &self.backoff, now);
        let error_message = result.as_ref().err().map(|e| e.to_string()).unwrap_or_default();
        let Some(claimed_at) = job.started_at else {
            error!(job_id = %job.id, "Job has no claim time; outcome discarded");
            return;
        };

        let applied = match &outcome {
            Outcome::Completed => self.store.mark_completed(job.id, claimed_at, now).await,
            Outcome::Retry {
                retry_count,
                scheduled_at,
            } => {
                self.store
                    .mark_retry(job.id, claimed_at, *retry_count, *scheduled_at, &error_message, now)
                    .await
            }
            Outcome::Failed => self.store.mark_failed(job.id, claimed_at, &error_message, now).await,
        };

        match applied {
            Ok(true) => match outcome {
                Outcome::Completed => {
                    info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                }
                Outcome::Retry {
                    retry_count,
                    scheduled_at,
                } => {
                    warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        retry_count,
                        max_retries = job.max_retries,
                        next_attempt = %scheduled_at,
                        "Job failed, scheduling retry: {}",
                        error_message
                    );
                }
                Outcome::Failed => {
                    error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        retry_count = job.retry_count,
                        "Job failed permanently: {}",
                        error_message
                    );
                }
            },
            Ok(false) => {
                warn!(job_id = %job.id, "Job was no longer processing; outcome discarded");
            }
            Err(e) => {
                error!(job_id = %job.id, "Failed to record job outcome: {}", e);
            }
        }
    }

    /// Wait up to `grace` for every running job to finish.
    pub(crate) async fn wait_idle(&self, grace: Duration) -> bool {
        matches!(
            tokio::time::timeout(grace, self.semaphore.acquire_many(self.max_workers)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
