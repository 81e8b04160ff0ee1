//! Built-in `job_retention` handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::info;

use hopper_workqueue::{Job, JobError, JobHandler, JobStore};

/// Job type served by [`RetentionHandler`].
pub(crate) const JOB_TYPE: &str = "job_retention";

/// Deletes finished jobs older than the retention window.
///
/// The window comes from the payload's `retention_days` when present,
/// otherwise from `[retention].days`.
pub(crate) struct RetentionHandler {
    store: Arc<dyn JobStore>,
    default_days: u32,
}

impl RetentionHandler {
    pub(crate) fn new(store: Arc<dyn JobStore>, default_days: u32) -> Self {
        Self { store, default_days }
    }

    fn retention_days(&self, job: &Job) -> Result<u32, JobError> {
        match job.payload.get("retention_days") {
            None | Some(serde_json::Value::Null) => Ok(self.default_days),
            Some(value) => value
                .as_u64()
                .and_then(|d| u32::try_from(d).ok())
                .ok_or_else(|| JobError::permanent(format!("invalid retention_days: {}", value))),
        }
    }
}

#[async_trait]
impl JobHandler for RetentionHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let days = self.retention_days(job)?;
        let cutoff = Utc::now() - Duration::days(i64::from(days));

        let purged = self
            .store
            .purge_finished(cutoff)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        info!(retention_days = days, purged, "Purged finished jobs");
        Ok(())
    }
}
