//! # Hopper Scheduler
//!
//! Time-driven trigger layer for the Hopper job queue.
//!
//! Each trigger pairs a cron schedule with a [`WorkSource`]. When the
//! schedule fires, the source is queried for the current eligible work units
//! and one job is enqueued per unit through a [`JobSink`].

pub mod error;
pub mod schedule;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod sweep;

pub use error::SchedulerError;
pub use scheduler::{SchedulerStatus, TriggerScheduler};
pub use sink::JobSink;
pub use source::{FnWorkSource, StaticWorkSource, WorkSource, WorkUnit};
pub use sweep::{run_sweep, SweepReport};
