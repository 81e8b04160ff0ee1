//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Columns selected for a full job row, in `row_to_job` order.
pub(crate) const JOB_COLUMNS: &str = "id, job_type, payload, status, priority, scheduled_at, \
     started_at, completed_at, error_message, retry_count, max_retries, created_at, updated_at";

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Jobs table; timestamps are Unix milliseconds
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT 'null',
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed', 'retry')),
    priority INTEGER NOT NULL DEFAULT 5,
    scheduled_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (retry_count <= max_retries)
);

-- Claim lookups and stats windows
CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
"#;
