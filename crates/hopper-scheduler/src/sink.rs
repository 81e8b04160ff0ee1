//! Destination for jobs produced by sweeps.

use async_trait::async_trait;
use hopper_workqueue::{EnqueueOptions, JobQueue, QueueError};
use uuid::Uuid;

/// Accepts enqueue requests from a sweep.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError>;
}

#[async_trait]
impl JobSink for JobQueue {
    async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        JobQueue::enqueue(self, job_type, payload, options).await
    }
}
