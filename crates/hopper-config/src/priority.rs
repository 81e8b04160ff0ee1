//! Well-known job priorities.
//!
//! Higher values are claimed first. Manual sweeps outrank every scheduled
//! trigger so an operator-requested run never waits behind routine work.

/// Jobs enqueued by an explicit operator request.
pub const MANUAL: i32 = 10;

/// Urgent scheduled work (daily sweeps).
pub const HIGH: i32 = 8;

/// Default priority for `enqueue` and routine scheduled work.
pub const NORMAL: i32 = 5;

/// Housekeeping that may wait (retention, cleanup).
pub const LOW: i32 = 2;
