//! Admin commands operating directly on the job store.

use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use uuid::Uuid;

use hopper_workqueue::{EnqueueOptions, JobQueue, JobStats, JobStatus};

pub(crate) async fn enqueue(
    queue: &JobQueue,
    job_type: &str,
    payload: &str,
    priority: Option<i32>,
    max_retries: Option<u32>,
    delay_secs: Option<u64>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;

    let mut options = EnqueueOptions::new();
    if let Some(priority) = priority {
        options = options.priority(priority);
    }
    if let Some(max_retries) = max_retries {
        options = options.max_retries(max_retries);
    }
    if let Some(delay) = delay_secs {
        let delay = chrono::Duration::from_std(Duration::from_secs(delay))
            .context("Delay is out of range")?;
        options = options.scheduled_at(Utc::now() + delay);
    }

    let id = queue.enqueue(job_type, payload, options).await?;
    println!("{}", id);
    Ok(())
}

pub(crate) async fn show(queue: &JobQueue, id: Uuid) -> anyhow::Result<()> {
    let Some(job) = queue.get_job(id).await? else {
        bail!("Job {} not found", id);
    };
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

pub(crate) async fn cancel(queue: &JobQueue, id: Uuid) -> anyhow::Result<()> {
    if queue.cancel_job(id).await? {
        println!("Cancelled {}", id);
        return Ok(());
    }
    match queue.get_job(id).await? {
        Some(job) => bail!("Job {} is {} and can no longer be cancelled", id, job.status),
        None => bail!("Job {} not found", id),
    }
}

pub(crate) async fn stats(queue: &JobQueue, format: &str) -> anyhow::Result<()> {
    let stats = queue.stats().await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
        "table" => print!("{}", render_stats(&stats)),
        other => bail!("Unknown format '{}' (expected table or json)", other),
    }
    Ok(())
}

fn render_stats(stats: &JobStats) -> String {
    let mut out = format!("Since {}\n", stats.since.format("%Y-%m-%d %H:%M:%S UTC"));
    out.push_str(&format!("{:<12} {:>8} {:>14}\n", "STATUS", "COUNT", "AVG DURATION"));
    for status in JobStatus::ALL {
        let entry = stats.get(status);
        let avg = entry
            .avg_duration_secs
            .map(|secs| format!("{:.2}s", secs))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("{:<12} {:>8} {:>14}\n", status.as_str(), entry.count, avg));
    }
    out.push_str(&format!("{:<12} {:>8}\n", "total", stats.total()));
    out
}

/// Reports store reachability. Engine liveness is only known to the
/// process running it, which logs its own health checks.
pub(crate) async fn health(queue: &JobQueue) -> anyhow::Result<()> {
    queue
        .store()
        .ping()
        .await
        .context("Job store is unreachable")?;
    let stats = queue.stats().await?;
    println!("store: reachable");
    println!(
        "last 24h: pending {}, processing {}, retry {}",
        stats.count(JobStatus::Pending),
        stats.count(JobStatus::Processing),
        stats.count(JobStatus::Retry)
    );
    Ok(())
}
