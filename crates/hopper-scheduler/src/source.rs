//! Eligible-work sources queried when a trigger fires.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One unit of eligible work; becomes exactly one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Identifies the unit in logs (e.g. a source id).
    pub key: String,
    /// Job payload. Objects are extended with the trigger markers.
    pub payload: serde_json::Value,
}

impl WorkUnit {
    pub fn new(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

/// Produces the current eligible work units for a trigger.
///
/// Called fresh on every fire; implementations must not serve a cached list
/// from an earlier fire.
#[async_trait]
pub trait WorkSource: Send + Sync {
    async fn eligible_units(&self) -> anyhow::Result<Vec<WorkUnit>>;
}

/// A fixed list of units, returned on every fire.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkSource {
    units: Vec<WorkUnit>,
}

impl StaticWorkSource {
    pub fn new(units: Vec<WorkUnit>) -> Self {
        Self { units }
    }

    /// A source yielding a single unit, e.g. for maintenance triggers.
    pub fn single(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(vec![WorkUnit::new(key, payload)])
    }
}

#[async_trait]
impl WorkSource for StaticWorkSource {
    async fn eligible_units(&self) -> anyhow::Result<Vec<WorkUnit>> {
        Ok(self.units.clone())
    }
}

/// Adapter turning an async closure into a [`WorkSource`].
pub struct FnWorkSource<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnWorkSource<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<WorkUnit>>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> WorkSource for FnWorkSource<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<WorkUnit>>> + Send + 'static,
{
    async fn eligible_units(&self) -> anyhow::Result<Vec<WorkUnit>> {
        (self.f)().await
    }
}
