//! Queue errors.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of the queue API.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The job could not be accepted.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// A stored status value is not part of the state machine.
    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    /// The store was unreachable or rejected the operation.
    #[error("Store error: {0}")]
    Store(String),

    /// Payload (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job types expected at startup have no registered handler.
    #[error("No handler registered for job types: {}", .0.join(", "))]
    MissingHandlers(Vec<String>),
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        QueueError::Store(e.to_string())
    }
}

/// Failure of a single job attempt.
///
/// Only the engine turns these into status transitions; handlers just
/// report them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Transient failure; retried while attempts remain.
    #[error("{0}")]
    Retryable(String),

    /// Failure that retrying cannot fix; the job fails immediately.
    #[error("{0}")]
    Permanent(String),

    /// The attempt exceeded its execution deadline.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// The handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// No handler is registered for the job type.
    #[error("No handler registered for job type '{0}'")]
    NoHandler(String),
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        JobError::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        JobError::Permanent(message.into())
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobError::Permanent(_) | JobError::NoHandler(_))
    }
}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        JobError::Retryable(format!("{:#}", e))
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        JobError::Retryable(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        JobError::Retryable(message.to_string())
    }
}
