//! SQLite job store.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Row, TransactionBehavior};
use tokio_rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use super::schema::{init_schema, JOB_COLUMNS};
use super::JobStore;
use crate::error::QueueError;
use crate::job::{Job, JobStatus};
use crate::stats::{JobStats, StatusStats};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed job store.
///
/// Claims run as one `UPDATE ... RETURNING` inside an immediate transaction.
/// The write lock serializes claimants across connections and processes, and
/// rows taken by an earlier claimant no longer match the eligibility filter.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Open (or create) a file-backed store.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                QueueError::Store(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&path).await?;
        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            init_schema(conn)
        })
        .await?;

        debug!("SqliteJobStore opened at {:?}", path);
        Ok(Self { conn })
    }

    /// Open a private in-memory store.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
            init_schema(conn)
        })
        .await?;
        Ok(Self { conn })
    }

    async fn execute_update(&self, sql: &'static str, id: Uuid, args: UpdateArgs) -> Result<bool, QueueError> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = match args {
                    UpdateArgs::Finish { claimed_at, now } => conn.execute(sql, params![id, claimed_at, now])?,
                    UpdateArgs::Fail {
                        claimed_at,
                        error,
                        now,
                    } => conn.execute(sql, params![id, claimed_at, error, now])?,
                    UpdateArgs::Retry {
                        claimed_at,
                        retry_count,
                        scheduled_at,
                        error,
                        now,
                    } => conn.execute(sql, params![id, claimed_at, retry_count, scheduled_at, error, now])?,
                    UpdateArgs::Cancel { reason, now } => conn.execute(sql, params![id, reason, now])?,
                };
                Ok(changed)
            })
            .await?;
        Ok(changed == 1)
    }
}

/// Bound parameters of the single-row updates. `claimed_at` is the claim's
/// `started_at` in milliseconds.
enum UpdateArgs {
    Finish {
        claimed_at: i64,
        now: i64,
    },
    Fail {
        claimed_at: i64,
        error: String,
        now: i64,
    },
    Retry {
        claimed_at: i64,
        retry_count: u32,
        scheduled_at: i64,
        error: String,
        now: i64,
    },
    Cancel {
        reason: String,
        now: i64,
    },
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, err.into())
}

fn millis_to_datetime(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp out of range: {}", ms)))
}

fn optional_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|ms| millis_to_datetime(idx, ms))
        .transpose()
}

/// Map a row selected with `JOB_COLUMNS` to a `Job`.
fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let payload: String = row.get(2)?;
    let status: String = row.get(3)?;

    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, Type::Text, e))?,
        job_type: row.get(1)?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(2, Type::Text, e))?,
        status: status
            .parse::<JobStatus>()
            .map_err(|e| conversion_error(3, Type::Text, e))?,
        priority: row.get(4)?,
        scheduled_at: millis_to_datetime(5, row.get(5)?)?,
        started_at: optional_datetime(row, 6)?,
        completed_at: optional_datetime(row, 7)?,
        error_message: row.get(8)?,
        retry_count: row.get(9)?,
        max_retries: row.get(10)?,
        created_at: millis_to_datetime(11, row.get(11)?)?,
        updated_at: millis_to_datetime(12, row.get(12)?)?,
    })
}

fn claim_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.scheduled_at.cmp(&b.scheduled_at))
        .then(a.created_at.cmp(&b.created_at))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&job.payload)?;
        let job = job.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, job_type, payload, status, priority, scheduled_at, started_at,
                     completed_at, error_message, retry_count, max_retries, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        job.id.to_string(),
                        job.job_type,
                        payload,
                        job.status.as_str(),
                        job.priority,
                        job.scheduled_at.timestamp_millis(),
                        job.started_at.map(|t| t.timestamp_millis()),
                        job.completed_at.map(|t| t.timestamp_millis()),
                        job.error_message,
                        job.retry_count,
                        job.max_retries,
                        job.created_at.timestamp_millis(),
                        job.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let id = id.to_string();
        let job = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
                match conn.query_row(&sql, [&id], row_to_job) {
                    Ok(job) => Ok(Some(job)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(job)
    }

    async fn claim_batch(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = now.timestamp_millis();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut jobs = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let jobs = {
                    let sql = format!(
                        "UPDATE jobs SET status = 'processing', started_at = ?1, updated_at = ?1
                         WHERE id IN (
                             SELECT id FROM jobs
                             WHERE status IN ('pending', 'retry') AND scheduled_at <= ?1
                             ORDER BY priority DESC, scheduled_at ASC, created_at ASC
                             LIMIT ?2
                         )
                         RETURNING {}",
                        JOB_COLUMNS
                    );
                    let mut stmt = tx.prepare(&sql)?;
                    let rows = stmt.query_map(params![now, limit], row_to_job)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                tx.commit()?;
                Ok(jobs)
            })
            .await?;

        // RETURNING order is unspecified.
        jobs.sort_by(claim_order);
        Ok(jobs)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        self.execute_update(
            "UPDATE jobs SET status = 'completed', completed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'processing' AND started_at = ?2",
            id,
            UpdateArgs::Finish {
                claimed_at: claimed_at.timestamp_millis(),
                now: now.timestamp_millis(),
            },
        )
        .await
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        self.execute_update(
            "UPDATE jobs SET status = 'retry', retry_count = MIN(?3, max_retries),
             scheduled_at = MAX(scheduled_at, ?4), error_message = ?5, updated_at = ?6
             WHERE id = ?1 AND status = 'processing' AND started_at = ?2",
            id,
            UpdateArgs::Retry {
                claimed_at: claimed_at.timestamp_millis(),
                retry_count,
                scheduled_at: scheduled_at.timestamp_millis(),
                error: error.to_string(),
                now: now.timestamp_millis(),
            },
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        self.execute_update(
            "UPDATE jobs SET status = 'failed', error_message = ?3, completed_at = ?4, updated_at = ?4
             WHERE id = ?1 AND status = 'processing' AND started_at = ?2",
            id,
            UpdateArgs::Fail {
                claimed_at: claimed_at.timestamp_millis(),
                error: error.to_string(),
                now: now.timestamp_millis(),
            },
        )
        .await
    }

    async fn cancel_pending(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool, QueueError> {
        self.execute_update(
            "UPDATE jobs SET status = 'failed', error_message = ?2, completed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            id,
            UpdateArgs::Cancel {
                reason: reason.to_string(),
                now: now.timestamp_millis(),
            },
        )
        .await
    }

    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Job>, QueueError> {
        let cutoff = started_before.timestamp_millis();
        let jobs = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM jobs WHERE status = 'processing' AND started_at < ?1",
                    JOB_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([cutoff], row_to_job)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(jobs)
    }

    async fn status_stats(&self, since: DateTime<Utc>) -> Result<JobStats, QueueError> {
        let since_ms = since.timestamp_millis();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT status, COUNT(*),
                            AVG(CASE WHEN started_at IS NOT NULL AND completed_at IS NOT NULL
                                     THEN (completed_at - started_at) / 1000.0 END)
                     FROM jobs WHERE created_at >= ?1
                     GROUP BY status",
                )?;
                let rows = stmt.query_map([since_ms], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut by_status = BTreeMap::new();
        for (status, count, avg) in rows {
            by_status.insert(
                status.parse::<JobStatus>()?,
                StatusStats {
                    count: count.max(0) as u64,
                    avg_duration_secs: avg,
                },
            );
        }
        Ok(JobStats::new(since, by_status))
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, QueueError> {
        let before = before.timestamp_millis();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM jobs WHERE status IN ('completed', 'failed')
                     AND COALESCE(completed_at, updated_at) < ?1",
                    [before],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
