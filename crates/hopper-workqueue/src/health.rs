//! Queue health reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Overall health of a queue engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store reachable and the poll loop is alive.
    Healthy,
    /// Store reachable but the engine is stopped or its loop has stalled.
    Degraded,
    /// Store unreachable.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health snapshot returned by `JobQueue::health`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub store_reachable: bool,
    pub engine_running: bool,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub status: HealthStatus,
}

impl QueueHealth {
    pub fn new(
        store_reachable: bool,
        engine_running: bool,
        last_poll_at: Option<DateTime<Utc>>,
    ) -> Self {
        let status = match (store_reachable, engine_running) {
            (false, _) => HealthStatus::Unhealthy,
            (true, true) => HealthStatus::Healthy,
            (true, false) => HealthStatus::Degraded,
        };
        Self {
            store_reachable,
            engine_running,
            last_poll_at,
            status,
        }
    }

    /// The aggregate boolean: store reachable and loop alive.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
