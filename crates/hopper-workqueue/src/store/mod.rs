//! Job persistence.
//!
//! Every state change after a claim names the claim it belongs to by its
//! `started_at`. The row must still be `processing` under that same claim,
//! so an outcome is recorded at most once per claim and never lands on a
//! later claim of the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::Job;
use crate::stats::JobStats;

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Durable storage for jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job row.
    async fn insert(&self, job: &Job) -> Result<(), QueueError>;

    /// Load a job by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    /// Atomically claim up to `limit` eligible jobs.
    ///
    /// Eligible means `pending` or `retry` with `scheduled_at <= now`. Claimed
    /// rows move to `processing` with `started_at = now` and are returned in
    /// `priority DESC, scheduled_at ASC` order. A row is never returned to two
    /// callers, including callers on other connections to the same store.
    async fn claim_batch(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// `processing -> completed` for the claim taken at `claimed_at`.
    async fn mark_completed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// `processing -> retry` for the claim taken at `claimed_at`, recording
    /// the attempt count, the next eligibility time and the failure reason.
    async fn mark_retry(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// `processing -> failed` for the claim taken at `claimed_at`.
    async fn mark_failed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// `pending -> failed`. Returns false if the job was not pending.
    async fn cancel_pending(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool, QueueError>;

    /// Jobs in `processing` whose `started_at` is before `started_before`.
    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Job>, QueueError>;

    /// Per-status counts and mean durations for jobs created since `since`.
    async fn status_stats(&self, since: DateTime<Utc>) -> Result<JobStats, QueueError>;

    /// Delete `completed` and `failed` jobs that finished before `before`.
    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, QueueError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), QueueError>;
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
