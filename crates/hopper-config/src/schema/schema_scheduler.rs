//! Schedule trigger layer configuration.

use serde::{Deserialize, Serialize};

use super::default_true;
use crate::priority;

/// Scheduler configuration for time-driven triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the trigger layer registers any triggers at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Trigger definitions. Replaces the built-in set when present.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<TriggerConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            triggers: default_triggers(),
        }
    }
}

impl SchedulerConfig {
    /// Look up a trigger definition by id.
    pub fn trigger(&self, id: &str) -> Option<&TriggerConfig> {
        self.triggers.iter().find(|t| t.id == id)
    }

    /// Overlay a partial update. Fields left as `None` keep their current value.
    pub fn apply(&mut self, update: SchedulerConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(triggers) = update.triggers {
            self.triggers = triggers;
        }
    }
}

/// A single time-driven trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Unique trigger id; work sources are registered against it.
    pub id: String,

    /// Cron schedule expression (6 fields including seconds).
    pub schedule: String,

    /// Job type enqueued for each eligible work unit.
    pub job_type: String,

    /// Priority assigned to the enqueued jobs.
    #[serde(default = "default_trigger_priority")]
    pub priority: i32,

    /// Marker copied into every payload as `schedule_type`.
    #[serde(default = "default_schedule_type")]
    pub schedule_type: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Overrides the queue's default retry ceiling for this trigger's jobs.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_trigger_priority() -> i32 {
    priority::NORMAL
}

fn default_schedule_type() -> String {
    "custom".to_string()
}

impl TriggerConfig {
    pub fn new(
        id: impl Into<String>,
        schedule: impl Into<String>,
        job_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            schedule: schedule.into(),
            job_type: job_type.into(),
            priority: default_trigger_priority(),
            schedule_type: default_schedule_type(),
            enabled: true,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_schedule_type(mut self, schedule_type: impl Into<String>) -> Self {
        self.schedule_type = schedule_type.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial scheduler configuration accepted by `update_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfigUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub triggers: Option<Vec<TriggerConfig>>,
}

/// The built-in trigger set: daily, weekly and monthly crawls, source
/// discovery and retention cleanup.
pub fn default_triggers() -> Vec<TriggerConfig> {
    vec![
        TriggerConfig::new("daily-crawl", "0 0 2 * * *", "crawl_source")
            .with_priority(priority::HIGH)
            .with_schedule_type("daily"),
        TriggerConfig::new("weekly-crawl", "0 0 3 * * SUN", "crawl_source")
            .with_priority(priority::NORMAL)
            .with_schedule_type("weekly"),
        TriggerConfig::new("monthly-crawl", "0 0 4 1 * *", "crawl_source")
            .with_priority(priority::NORMAL)
            .with_schedule_type("monthly"),
        TriggerConfig::new("discovery", "0 0 6 * * MON", "discover_sources")
            .with_priority(priority::NORMAL)
            .with_schedule_type("discovery"),
        TriggerConfig::new("cleanup", "0 30 3 * * *", "job_retention")
            .with_priority(priority::LOW)
            .with_schedule_type("cleanup")
            .with_max_retries(1),
    ]
}
