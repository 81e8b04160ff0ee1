//! Job handlers and the type-keyed registry.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{JobError, QueueError};
use crate::job::Job;

/// Executes jobs of one type.
///
/// Handlers receive the stored job, including its payload and retry count,
/// and report the outcome. They never touch job status themselves.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F, Fut>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        (self.f)(job.clone()).await
    }
}

/// Wrap an async closure as a handler.
///
/// ```ignore
/// queue.register_handler("noop", handler_fn(|_job| async { Ok(()) }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

/// A registered handler and its optional execution deadline.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Arc<dyn JobHandler>,
    pub timeout: Option<Duration>,
}

/// Handlers keyed by job type. Registering a type twice replaces the first.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, RegisteredHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`; the last registration wins.
    pub fn register(
        &self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        timeout: Option<Duration>,
    ) {
        let job_type = job_type.into();
        let previous = self
            .handlers
            .write()
            .insert(job_type.clone(), RegisteredHandler { handler, timeout });

        if previous.is_some() {
            warn!("Replaced handler for job type '{}'", job_type);
        } else {
            debug!("Registered handler for job type '{}'", job_type);
        }
    }

    pub fn get(&self, job_type: &str) -> Option<RegisteredHandler> {
        self.handlers.read().get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.read().contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Types from `expected` that have no handler.
    pub fn missing<'a, I>(&self, expected: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let handlers = self.handlers.read();
        let mut missing: Vec<String> = expected
            .into_iter()
            .filter(|t| !handlers.contains_key(*t))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Fail if any type in `expected` lacks a handler.
    pub fn validate<'a, I>(&self, expected: I) -> Result<(), QueueError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let missing = self.missing(expected);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(QueueError::MissingHandlers(missing))
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
