//! In-memory job store for tests and embedding without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::JobStore;
use crate::error::QueueError;
use crate::job::{Job, JobStatus};
use crate::stats::{aggregate, JobStats};

/// Job store backed by a `HashMap` behind one lock.
///
/// Claims select and mark rows under the write lock, which makes them atomic
/// with respect to every other caller sharing the store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Apply `f` to a job still `processing` under the claim taken at
    /// `claimed_at`. Returns false when the job is missing, finished or
    /// claimed again since.
    async fn update_processing<F>(&self, id: Uuid, claimed_at: DateTime<Utc>, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing && job.started_at == Some(claimed_at) => {
                f(job);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::Store(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn claim_batch(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, QueueError> {
        let mut jobs = self.jobs.write().await;

        let mut eligible: Vec<&Job> = jobs.values().filter(|j| j.is_eligible(now)).collect();
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.created_at.cmp(&b.created_at))
        });
        let ids: Vec<Uuid> = eligible.into_iter().take(limit).map(|j| j.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        Ok(self
            .update_processing(id, claimed_at, |job| {
                job.status = JobStatus::Completed;
                job.completed_at = Some(now);
                job.updated_at = now;
            })
            .await)
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        Ok(self
            .update_processing(id, claimed_at, |job| {
                job.status = JobStatus::Retry;
                job.retry_count = retry_count.min(job.max_retries);
                job.scheduled_at = scheduled_at.max(job.scheduled_at);
                job.error_message = Some(error.to_string());
                job.updated_at = now;
            })
            .await)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        Ok(self
            .update_processing(id, claimed_at, |job| {
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
                job.completed_at = Some(now);
                job.updated_at = now;
            })
            .await)
    }

    async fn cancel_pending(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Failed;
                job.error_message = Some(reason.to_string());
                job.completed_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Job>, QueueError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Processing
                    && j.started_at.is_some_and(|started| started < started_before)
            })
            .cloned()
            .collect())
    }

    async fn status_stats(&self, since: DateTime<Utc>) -> Result<JobStats, QueueError> {
        let jobs = self.jobs.read().await;
        let rows = jobs.values().filter(|j| j.created_at >= since).map(|j| {
            let secs = j.duration().map(|d| d.num_milliseconds() as f64 / 1000.0);
            (j.status, secs)
        });
        Ok(JobStats::new(since, aggregate(rows)))
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut jobs = self.jobs.write().await;
        let initial = jobs.len();
        jobs.retain(|_, j| !(j.status.is_terminal() && j.completed_at.unwrap_or(j.updated_at) < before));
        Ok((initial - jobs.len()) as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
