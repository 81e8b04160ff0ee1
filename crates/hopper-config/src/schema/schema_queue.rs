//! Job queue engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::priority;

/// Queue configuration for job processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Interval between poll cycles, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum jobs claimed per poll cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Maximum number of concurrently executing handlers.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    /// Priority assigned when `enqueue` is called without one.
    #[serde(default = "default_priority")]
    pub default_priority: i32,

    /// Maximum retries assigned when `enqueue` is called without a value.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Retry delays in seconds, indexed by retry attempt. The last entry is reused.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// Execution deadline applied to every job without a per-type override.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    /// Jobs left in `processing` for longer than this are recovered on start.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// How long `stop` waits for in-flight handlers.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_batch_size() -> u32 {
    10
}

fn default_max_workers() -> u32 {
    4
}

fn default_priority() -> i32 {
    priority::NORMAL
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_secs() -> Vec<u64> {
    vec![60, 300, 900]
}

fn default_stale_after_secs() -> u64 {
    30 * 60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            default_priority: default_priority(),
            default_max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            job_timeout_secs: None,
            stale_after_secs: default_stale_after_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}
