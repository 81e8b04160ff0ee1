//! Job definition and status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Job status.
///
/// Valid transitions: `pending -> processing`, `processing -> completed`,
/// `processing -> retry`, `processing -> failed`, `retry -> processing`, and
/// `pending -> failed` for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by an engine and handed to a handler.
    Processing,
    /// Handler returned successfully.
    Completed,
    /// Terminal failure (exhausted, non-retryable, or cancelled).
    Failed,
    /// Failed attempt waiting for its backoff to elapse.
    Retry,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retry => "retry",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses a poll cycle may claim once `scheduled_at` has elapsed.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retry)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QueueError::InvalidStatus(s.to_string()))
    }
}

/// A job in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: Uuid,
    /// Key selecting the handler.
    pub job_type: String,
    /// Opaque data handed to the handler verbatim.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Higher claims first.
    pub priority: i32,
    /// Not eligible before this instant.
    pub scheduled_at: DateTime<Utc>,
    /// Set when the job was last claimed.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last failure reason.
    pub error_message: Option<String>,
    /// Retries already consumed.
    pub retry_count: u32,
    /// Ceiling for `retry_count`.
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job that is eligible immediately.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            priority: crate::priority::NORMAL,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_at = time;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Check if another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Check if a poll cycle at `now` may claim this job.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.scheduled_at <= now
    }

    /// True while the job waits for a retry that has not come due yet.
    pub fn awaiting_retry(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Retry && self.scheduled_at > now
    }

    /// Wall time of the last attempt, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Optional settings for `JobQueue::enqueue`.
///
/// Unset fields fall back to the queue configuration (priority 5, run now,
/// three retries by default).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn scheduled_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(time);
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }
}
