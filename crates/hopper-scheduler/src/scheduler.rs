//! Trigger scheduler: one timer task per enabled trigger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use hopper_config::{priority, SchedulerConfig, SchedulerConfigUpdate, TriggerConfig};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::schedule::{next_fire, parse_schedule};
use crate::sink::JobSink;
use crate::source::WorkSource;
use crate::sweep::{run_sweep, SweepReport};

/// Snapshot returned by [`TriggerScheduler::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub active_trigger_count: usize,
}

/// Handles of the trigger tasks spawned by one `start`.
struct SchedulerState {
    shutdown: CancellationToken,
    triggers: Vec<(String, JoinHandle<()>)>,
}

impl SchedulerState {
    /// Trigger tasks still waiting for their next fire time.
    fn active_count(&self) -> usize {
        self.triggers.iter().filter(|(_, handle)| !handle.is_finished()).count()
    }

    async fn shutdown(self) {
        self.shutdown.cancel();
        for (trigger_id, handle) in self.triggers {
            if let Err(e) = handle.await {
                error!(trigger_id = %trigger_id, "Trigger task terminated abnormally: {}", e);
            }
        }
    }
}

/// Time-driven trigger layer.
///
/// Each instance owns its own trigger tasks; several schedulers can run side
/// by side against different sinks.
pub struct TriggerScheduler {
    config: RwLock<SchedulerConfig>,
    sink: Arc<dyn JobSink>,
    sources: RwLock<HashMap<String, Arc<dyn WorkSource>>>,
    state: Mutex<Option<SchedulerState>>,
}

impl TriggerScheduler {
    pub fn new(config: SchedulerConfig, sink: Arc<dyn JobSink>) -> Self {
        Self {
            config: RwLock::new(config),
            sink,
            sources: RwLock::new(HashMap::new()),
            state: Mutex::new(None),
        }
    }

    /// Attach the work source for `trigger_id`. Takes effect on the next start.
    pub fn register_source<S>(&self, trigger_id: impl Into<String>, source: S)
    where
        S: WorkSource + 'static,
    {
        let trigger_id = trigger_id.into();
        if self
            .sources
            .write()
            .insert(trigger_id.clone(), Arc::new(source))
            .is_some()
        {
            warn!(trigger_id = %trigger_id, "Replaced work source");
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config.read().clone()
    }

    /// Spawn one timer task per enabled trigger with a registered source.
    ///
    /// Every enabled trigger's schedule is parsed before anything is spawned,
    /// so an invalid expression leaves the scheduler stopped.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("Trigger scheduler is already running");
            return Ok(());
        }
        *state = Some(self.spawn_triggers()?);
        Ok(())
    }

    /// Cancel every trigger task. Jobs already enqueued are unaffected.
    pub async fn stop(&self) {
        let Some(state) = self.state.lock().await.take() else {
            warn!("Trigger scheduler is not running");
            return;
        };
        state.shutdown().await;
        info!("Trigger scheduler stopped");
    }

    /// Replace the configuration. A running scheduler is fully stopped and
    /// restarted so no mix of old and new triggers is ever active.
    pub async fn update_config(&self, update: SchedulerConfigUpdate) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;

        let mut next = self.config.read().clone();
        next.apply(update);

        if state.is_none() {
            *self.config.write() = next;
            info!("Trigger scheduler configuration updated");
            return Ok(());
        }

        // A bad update returns here with the old triggers still owned by `state`.
        validate_schedules(&next)?;

        if let Some(current) = state.take() {
            current.shutdown().await;
        }
        *self.config.write() = next;
        *state = Some(self.spawn_triggers()?);
        info!("Trigger scheduler restarted with updated configuration");
        Ok(())
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        SchedulerStatus {
            is_running: state.is_some(),
            active_trigger_count: state.as_ref().map(SchedulerState::active_count).unwrap_or(0),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Run a sweep for `trigger_id` immediately at manual priority.
    pub async fn fire_now(&self, trigger_id: &str) -> Result<SweepReport, SchedulerError> {
        let trigger = self
            .config
            .read()
            .trigger(trigger_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownTrigger(trigger_id.to_string()))?;
        let source = self
            .sources
            .read()
            .get(trigger_id)
            .cloned()
            .ok_or_else(|| SchedulerError::NoSource(trigger_id.to_string()))?;

        info!(trigger_id = %trigger_id, "Manual sweep requested");
        run_sweep(&trigger, source.as_ref(), self.sink.as_ref(), priority::MANUAL).await
    }

    fn spawn_triggers(&self) -> Result<SchedulerState, SchedulerError> {
        let config = self.config.read().clone();
        let schedules = validate_schedules(&config)?;

        let shutdown = CancellationToken::new();
        let mut triggers = Vec::new();

        if !config.enabled {
            info!("Trigger scheduler started with triggers disabled");
            return Ok(SchedulerState { shutdown, triggers });
        }

        let sources = self.sources.read();
        for (trigger, schedule) in schedules {
            let Some(source) = sources.get(&trigger.id).cloned() else {
                warn!(trigger_id = %trigger.id, "No work source registered, trigger skipped");
                continue;
            };

            debug!(trigger_id = %trigger.id, schedule = %trigger.schedule, "Registering trigger");
            let id = trigger.id.clone();
            let handle = tokio::spawn(run_trigger(
                trigger,
                schedule,
                source,
                self.sink.clone(),
                shutdown.child_token(),
            ));
            triggers.push((id, handle));
        }

        info!(active_triggers = triggers.len(), "Trigger scheduler started");
        Ok(SchedulerState { shutdown, triggers })
    }
}

/// Parse the schedule of every enabled trigger.
fn validate_schedules(config: &SchedulerConfig) -> Result<Vec<(TriggerConfig, Schedule)>, SchedulerError> {
    config
        .triggers
        .iter()
        .filter(|t| t.enabled)
        .map(|t| parse_schedule(t).map(|s| (t.clone(), s)))
        .collect()
}

async fn run_trigger(
    trigger: TriggerConfig,
    schedule: Schedule,
    source: Arc<dyn WorkSource>,
    sink: Arc<dyn JobSink>,
    shutdown: CancellationToken,
) {
    let mut after = Utc::now();

    loop {
        let Some(fire_at) = next_fire(&schedule, after) else {
            info!(trigger_id = %trigger.id, "Schedule has no upcoming fire time");
            break;
        };
        let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        debug!(trigger_id = %trigger.id, fire_at = %fire_at, "Trigger fired");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            // Errors are logged inside the sweep.
            _ = run_sweep(&trigger, source.as_ref(), sink.as_ref(), trigger.priority) => {}
        }

        // Fires missed during a long sweep are skipped, not replayed.
        after = fire_at.max(Utc::now());
    }

    debug!(trigger_id = %trigger.id, "Trigger task exited");
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
