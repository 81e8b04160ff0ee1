//! Configuration validation.

use std::collections::HashSet;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Collapse into a `ConfigError` carrying the first error, if any.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_store(config, &mut result);
        Self::validate_queue(config, &mut result);
        Self::validate_scheduler(config, &mut result);
        Self::validate_retention(config, &mut result);

        result
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if config.store.path.as_os_str().is_empty() {
            result.add_error(ValidationError::new("store.path", "Store path cannot be empty"));
        }
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        let queue = &config.queue;

        if queue.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "queue.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }

        if queue.batch_size == 0 {
            result.add_error(ValidationError::new(
                "queue.batch_size",
                "batch_size must be greater than 0",
            ));
        }

        if queue.max_workers == 0 {
            result.add_error(ValidationError::new(
                "queue.max_workers",
                "max_workers must be greater than 0",
            ));
        }

        if queue.batch_size > queue.max_workers * 4 {
            result.add_warning(ValidationWarning::new(
                "queue.batch_size",
                "batch_size is much larger than max_workers; claims are capped by free workers",
            ));
        }

        if queue.backoff_secs.is_empty() {
            result.add_error(ValidationError::new(
                "queue.backoff_secs",
                "backoff_secs needs at least one delay",
            ));
        } else if queue.backoff_secs.windows(2).any(|w| w[1] < w[0]) {
            result.add_error(ValidationError::new(
                "queue.backoff_secs",
                "backoff delays must not decrease",
            ));
        }

        if queue.default_max_retries > 20 {
            result.add_warning(ValidationWarning::new(
                "queue.default_max_retries",
                "default_max_retries is very high (>20)",
            ));
        }

        match queue.job_timeout_secs {
            Some(0) => result.add_error(ValidationError::new(
                "queue.job_timeout_secs",
                "job_timeout_secs must be greater than 0 when set",
            )),
            Some(timeout) if queue.stale_after_secs <= timeout => result.add_error(ValidationError::new(
                "queue.stale_after_secs",
                format!(
                    "stale_after_secs ({}) must be greater than job_timeout_secs ({})",
                    queue.stale_after_secs, timeout
                ),
            )),
            Some(_) => {}
            None => result.add_warning(ValidationWarning::new(
                "queue.job_timeout_secs",
                "job_timeout_secs is not set; stalled jobs are only recovered for handlers with their own timeout",
            )),
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for trigger in &config.scheduler.triggers {
            let path = format!("scheduler.triggers.{}", trigger.id);

            if trigger.id.is_empty() {
                result.add_error(ValidationError::new(
                    "scheduler.triggers",
                    "Trigger id cannot be empty",
                ));
            }

            if !seen.insert(trigger.id.as_str()) {
                result.add_error(ValidationError::new(
                    path.clone(),
                    format!("Duplicate trigger id '{}'", trigger.id),
                ));
            }

            if trigger.job_type.is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.job_type", path),
                    "job_type cannot be empty",
                ));
            }

            if let Err(e) = cron::Schedule::from_str(&trigger.schedule) {
                result.add_error(ValidationError::new(
                    format!("{}.schedule", path),
                    format!("Invalid cron expression '{}': {}", trigger.schedule, e),
                ));
            }
        }

        if config.scheduler.enabled && config.scheduler.triggers.iter().all(|t| !t.enabled) {
            result.add_warning(ValidationWarning::new(
                "scheduler.triggers",
                "Scheduler is enabled but no trigger is enabled",
            ));
        }
    }

    fn validate_retention(config: &Config, result: &mut ValidationResult) {
        if config.retention.days == 0 {
            result.add_warning(ValidationWarning::new(
                "retention.days",
                "retention.days is 0; every finished job is purged on each cleanup run",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
