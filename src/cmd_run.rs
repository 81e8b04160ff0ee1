//! `hopper run`: the queue engine and trigger layer in the foreground.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use hopper_config::{Config, ConfigLoader, SchedulerConfigUpdate};
use hopper_scheduler::{StaticWorkSource, TriggerScheduler};
use hopper_workqueue::JobQueue;

use crate::retention::{self, RetentionHandler};

/// How often the running process logs a health check.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Trigger that feeds the built-in retention handler.
const CLEANUP_TRIGGER: &str = "cleanup";

enum Signal {
    Shutdown,
    Reload,
}

pub(crate) async fn run(config: Config, config_path: &Path) -> anyhow::Result<()> {
    info!("Starting Hopper v{}", env!("CARGO_PKG_VERSION"));
    info!("Job store: {}", config.store.path.display());

    let store = crate::open_store(&config).await?;
    let queue = Arc::new(JobQueue::new(config.queue.clone(), store.clone()));
    queue.register_handler(
        retention::JOB_TYPE,
        RetentionHandler::new(store, config.retention.days),
    );

    let scheduler = TriggerScheduler::new(config.scheduler.clone(), queue.clone());
    scheduler.register_source(CLEANUP_TRIGGER, StaticWorkSource::single("retention", serde_json::json!({})));

    let expected = config
        .scheduler
        .triggers
        .iter()
        .filter(|t| t.enabled)
        .map(|t| t.job_type.as_str());
    let missing = queue.missing_handlers(expected);
    if !missing.is_empty() {
        warn!(
            "No handler registered for job types {:?}; their jobs will fail until one is",
            missing
        );
    }

    queue.start().await.context("Failed to start job queue")?;
    if let Err(e) = scheduler.start().await {
        queue.stop().await;
        return Err(e).context("Failed to start trigger scheduler");
    }
    info!("Hopper ready");

    let mut signals = Signals::new()?;
    let mut health_tick = tokio::time::interval(HEALTH_INTERVAL);
    health_tick.tick().await;

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Signal::Shutdown => break,
                Signal::Reload => reload_triggers(&scheduler, config_path).await,
            },
            _ = health_tick.tick() => {
                let health = queue.health().await;
                if health.is_healthy() {
                    debug!(status = %health.status, "Health check");
                } else {
                    warn!(
                        status = %health.status,
                        store_reachable = health.store_reachable,
                        engine_running = health.engine_running,
                        "Health check"
                    );
                }
            }
        }
    }

    info!("Shutting down");
    scheduler.stop().await;
    queue.stop().await;
    info!("Hopper stopped");
    Ok(())
}

/// Re-read `[scheduler]` from the config file and apply it.
async fn reload_triggers(scheduler: &TriggerScheduler, config_path: &Path) {
    info!("Reloading trigger configuration from {}", config_path.display());
    let config = match ConfigLoader::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to reload configuration: {}", e);
            return;
        }
    };

    let update = SchedulerConfigUpdate {
        enabled: Some(config.scheduler.enabled),
        triggers: Some(config.scheduler.triggers),
    };
    match scheduler.update_config(update).await {
        Ok(()) => info!("Trigger configuration reloaded"),
        Err(e) => error!("Rejected trigger configuration: {}", e),
    }
}

/// SIGINT/SIGTERM request shutdown, SIGHUP reloads the triggers.
#[cfg(unix)]
struct Signals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> anyhow::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
            sighup: signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?,
        })
    }

    async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM");
                Signal::Shutdown
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT");
                Signal::Shutdown
            }
            _ = self.sighup.recv() => {
                info!("Received SIGHUP");
                Signal::Reload
            }
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> anyhow::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Signal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
        Signal::Shutdown
    }
}
