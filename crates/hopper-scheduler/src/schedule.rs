//! Cron schedule parsing and common schedule shapes.
//!
//! Expressions use the 6-field form `sec min hour day_of_month month day_of_week`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use hopper_config::TriggerConfig;

use crate::error::SchedulerError;

/// Parse a trigger's schedule expression.
pub fn parse_schedule(trigger: &TriggerConfig) -> Result<Schedule, SchedulerError> {
    Schedule::from_str(&trigger.schedule).map_err(|e| SchedulerError::InvalidSchedule {
        trigger_id: trigger.id.clone(),
        expression: trigger.schedule.clone(),
        message: e.to_string(),
    })
}

/// First fire time strictly after `after`.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Every day at `hour:minute`.
pub fn daily(hour: u32, minute: u32) -> String {
    format!("0 {} {} * * *", minute, hour)
}

/// Every week on `weekday` (e.g. `"SUN"`) at `hour:minute`.
pub fn weekly(weekday: &str, hour: u32, minute: u32) -> String {
    format!("0 {} {} * * {}", minute, hour, weekday)
}

/// Every month on `day` at `hour:minute`.
pub fn monthly(day: u32, hour: u32, minute: u32) -> String {
    format!("0 {} {} {} * *", minute, hour, day)
}
