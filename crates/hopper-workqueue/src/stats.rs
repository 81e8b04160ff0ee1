//! Per-status job statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::job::JobStatus;

/// Trailing window covered by [`JobStats`].
pub fn stats_window() -> Duration {
    Duration::hours(24)
}

/// Count and mean duration for one status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusStats {
    pub count: u64,
    /// Mean of `completed_at - started_at` in seconds, over rows with both set.
    pub avg_duration_secs: Option<f64>,
}

/// Snapshot of the jobs created within the trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub since: DateTime<Utc>,
    pub by_status: BTreeMap<JobStatus, StatusStats>,
}

impl JobStats {
    pub fn new(since: DateTime<Utc>, by_status: BTreeMap<JobStatus, StatusStats>) -> Self {
        Self { since, by_status }
    }

    /// Stats for `status`, zero when no job in the window has it.
    pub fn get(&self, status: JobStatus) -> StatusStats {
        self.by_status.get(&status).cloned().unwrap_or_default()
    }

    pub fn count(&self, status: JobStatus) -> u64 {
        self.by_status.get(&status).map(|s| s.count).unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.by_status.values().map(|s| s.count).sum()
    }
}

/// Fold `(status, duration_secs)` pairs into per-status stats.
pub(crate) fn aggregate<I>(rows: I) -> BTreeMap<JobStatus, StatusStats>
where
    I: IntoIterator<Item = (JobStatus, Option<f64>)>,
{
    let mut sums: BTreeMap<JobStatus, (u64, f64, u64)> = BTreeMap::new();
    for (status, duration) in rows {
        let entry = sums.entry(status).or_insert((0, 0.0, 0));
        entry.0 += 1;
        if let Some(secs) = duration {
            entry.1 += secs;
            entry.2 += 1;
        }
    }

    sums.into_iter()
        .map(|(status, (count, total, timed))| {
            let avg = (timed > 0).then(|| total / timed as f64);
            (
                status,
                StatusStats {
                    count,
                    avg_duration_secs: avg,
                },
            )
        })
        .collect()
}
