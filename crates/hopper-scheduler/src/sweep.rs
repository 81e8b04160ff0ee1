//! One firing of a trigger: query the source, enqueue one job per unit.

use hopper_config::TriggerConfig;
use hopper_workqueue::EnqueueOptions;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::sink::JobSink;
use crate::source::{WorkSource, WorkUnit};

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub trigger_id: String,
    pub enqueued: usize,
    pub failed: usize,
}

/// Add the trigger markers to a unit payload.
///
/// Object payloads gain `schedule_type` and `trigger_id`; anything else is
/// wrapped as `{"data": <payload>, ...}`.
fn tag_payload(unit: WorkUnit, trigger: &TriggerConfig) -> serde_json::Value {
    let mut object = match unit.payload {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    object.insert(
        "schedule_type".to_string(),
        serde_json::Value::String(trigger.schedule_type.clone()),
    );
    object.insert(
        "trigger_id".to_string(),
        serde_json::Value::String(trigger.id.clone()),
    );
    serde_json::Value::Object(object)
}

/// Run one sweep for `trigger` at `priority`.
///
/// A failing source aborts the sweep before anything is enqueued. A failing
/// enqueue is logged and counted; the remaining units are still enqueued and
/// nothing already enqueued is rolled back.
pub async fn run_sweep(
    trigger: &TriggerConfig,
    source: &dyn WorkSource,
    sink: &dyn JobSink,
    priority: i32,
) -> Result<SweepReport, SchedulerError> {
    let units = source.eligible_units().await.map_err(|e| {
        error!(trigger_id = %trigger.id, "Eligible-work query failed, sweep aborted: {:#}", e);
        SchedulerError::Source {
            trigger_id: trigger.id.clone(),
            message: format!("{:#}", e),
        }
    })?;

    debug!(trigger_id = %trigger.id, units = units.len(), "Sweep started");

    let mut report = SweepReport {
        trigger_id: trigger.id.clone(),
        ..Default::default()
    };

    for unit in units {
        let key = unit.key.clone();
        let mut options = EnqueueOptions::new().priority(priority);
        if let Some(max_retries) = trigger.max_retries {
            options = options.max_retries(max_retries);
        }

        match sink
            .enqueue(&trigger.job_type, tag_payload(unit, trigger), options)
            .await
        {
            Ok(job_id) => {
                debug!(trigger_id = %trigger.id, unit = %key, job_id = %job_id, "Unit enqueued");
                report.enqueued += 1;
            }
            Err(e) => {
                warn!(trigger_id = %trigger.id, unit = %key, "Failed to enqueue unit: {}", e);
                report.failed += 1;
            }
        }
    }

    info!(
        trigger_id = %trigger.id,
        job_type = %trigger.job_type,
        enqueued = report.enqueued,
        failed = report.failed,
        "Sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
#[path = "sweep_tests.rs"]
mod tests;
