//! Hopper - durable job queue with a schedule trigger layer
//!
//! Main entry point for the Hopper daemon and admin CLI.

mod cli;
mod cmd_jobs;
mod cmd_run;
mod retention;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use hopper_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use hopper_workqueue::{JobQueue, JobStore, SqliteJobStore};

use crate::cli::{Cli, Commands};

/// Initialize tracing with console output and, when `logging.dir` is set,
/// a daily-rotated log file.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let console = if logging.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    let file = match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("hopper")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)
                .context("Failed to create log file appender")?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // The guard flushes the file writer on drop; keep it for the process lifetime.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

/// Load and validate the configuration, applying the `--db` override.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = ConfigLoader::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(db) = &cli.db {
        config.store.path = db.clone();
    }

    let warnings = ConfigValidator::validate(&config)
        .into_result()
        .context("Invalid configuration")?;
    for warning in warnings {
        tracing::warn!("Config {}: {}", warning.path, warning.message);
    }
    Ok(config)
}

pub(crate) async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    let store = SqliteJobStore::open(
        &config.store.path,
        Duration::from_millis(config.store.busy_timeout_ms),
    )
    .await
    .with_context(|| format!("Failed to open job store {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

/// A queue over the configured store that is never started; admin commands
/// only read and write rows.
async fn admin_queue(config: &Config) -> anyhow::Result<JobQueue> {
    Ok(JobQueue::new(config.queue.clone(), open_store(config).await?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Parse once up front so logging honors `[logging]`; errors are reported after init.
    let preload = ConfigLoader::load_or_default(&cli.config).ok();
    let logging = preload.map(|c| c.logging).unwrap_or_default();
    init_tracing(&logging)?;

    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run::run(config, &cli.config).await,
        Commands::Enqueue {
            job_type,
            payload,
            priority,
            max_retries,
            delay_secs,
        } => {
            let queue = admin_queue(&config).await?;
            cmd_jobs::enqueue(&queue, &job_type, &payload, priority, max_retries, delay_secs).await
        }
        Commands::Show { id } => cmd_jobs::show(&admin_queue(&config).await?, id).await,
        Commands::Cancel { id } => cmd_jobs::cancel(&admin_queue(&config).await?, id).await,
        Commands::Stats { format } => cmd_jobs::stats(&admin_queue(&config).await?, &format).await,
        Commands::Health => cmd_jobs::health(&admin_queue(&config).await?).await,
    }
}
