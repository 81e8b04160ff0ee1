//! # Hopper Work Queue
//!
//! Durable job queue for background work.
//!
//! ## Features
//!
//! - Prioritized jobs with delayed eligibility (`scheduled_at`)
//! - Atomic batch claims, safe across engine instances sharing one store
//! - Retry with an escalating backoff table and terminal failure
//! - Worker pool with optional per-job deadlines
//! - SQLite and in-memory stores
//! - Per-status statistics and health reporting

pub mod backoff;
pub mod engine;
pub mod error;
pub mod handler;
pub mod health;
pub mod job;
pub mod stats;
pub mod store;
mod worker;

pub use backoff::BackoffPolicy;
pub use engine::JobQueue;
pub use error::{JobError, QueueError};
pub use handler::{handler_fn, FnHandler, HandlerRegistry, JobHandler, RegisteredHandler};
pub use health::{HealthStatus, QueueHealth};
pub use hopper_config::priority;
pub use job::{EnqueueOptions, Job, JobStatus};
pub use stats::{JobStats, StatusStats};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
