//! Scheduler errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid schedule '{expression}' for trigger '{trigger_id}': {message}")]
    InvalidSchedule {
        trigger_id: String,
        expression: String,
        message: String,
    },

    /// The eligible-work query failed; the sweep was aborted.
    #[error("Work source for trigger '{trigger_id}' failed: {message}")]
    Source { trigger_id: String, message: String },

    /// No work source is registered for the trigger.
    #[error("No work source registered for trigger '{0}'")]
    NoSource(String),

    #[error("Unknown trigger: {0}")]
    UnknownTrigger(String),
}
