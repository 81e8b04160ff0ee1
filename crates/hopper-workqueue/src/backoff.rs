//! Retry backoff table.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Escalating retry delays.
///
/// The first retry waits `delays[0]`, the second `delays[1]`, and so on. Once
/// the table is exhausted the last entry is reused. Delays never decrease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    delays: Vec<Duration>,
}

impl BackoffPolicy {
    /// Build a policy from a delay table.
    ///
    /// An empty table falls back to the default. A decreasing entry is raised
    /// to the running maximum so retries never get closer together.
    pub fn new(delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            return Self::default();
        }

        let mut max = Duration::ZERO;
        let delays = delays
            .into_iter()
            .map(|d| {
                max = max.max(d);
                max
            })
            .collect();

        Self { delays }
    }

    /// Build a policy from whole seconds.
    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay before the retry numbered `retry_count` (1-based).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let index = (retry_count.max(1) as usize - 1).min(self.delays.len() - 1);
        self.delays[index]
    }

    /// When the retry numbered `retry_count` becomes eligible, measured from `now`.
    pub fn next_attempt_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(retry_count))
            .unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
            ],
        }
    }
}
