//! Plan cache: long-lived storage for L3-generated plans.
//!
//! Query patterns rarely change, so plans keep for 30 days with a 7-day
//! stale-while-revalidate grace. Keyed by query plus an optional context
//! digest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::AgentError;
use crate::plan::ToolPlan;

use super::{compute_key, CacheBackend, CacheConfig, CacheStatsSnapshot, SwrCache};

const TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const GRACE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cache for execution plans.
#[derive(Clone)]
pub struct PlanCache {
    inner: SwrCache,
}

impl PlanCache {
    pub fn new() -> Self {
        Self {
            inner: SwrCache::in_memory(Self::config()),
        }
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            inner: SwrCache::new(Self::config(), backend),
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            ttl: TTL,
            swr_grace: GRACE,
            key_prefix: "plan",
        }
    }

    fn cache_key(query: &str, context: Option<&Value>) -> String {
        match context {
            Some(ctx) => compute_key(&[query, &ctx.to_string()]),
            None => compute_key(&[query]),
        }
    }

    /// Fresh cached plan for `query`, if any. Entries that no longer
    /// deserialize are dropped silently.
    pub async fn get_plan(&self, query: &str, context: Option<&Value>) -> Option<ToolPlan> {
        let value = self.inner.get(&Self::cache_key(query, context)).await?;
        match serde_json::from_value(value) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!(error = %e, "cached plan no longer deserializes, ignoring");
                None
            }
        }
    }

    /// Stores a plan for `query`.
    pub async fn store_plan(&self, query: &str, context: Option<&Value>, plan: &ToolPlan) {
        match serde_json::to_value(plan) {
            Ok(value) => {
                self.inner
                    .set(&Self::cache_key(query, context), value, None)
                    .await;
            }
            Err(e) => warn!(error = %e, "plan serialization failed, not cached"),
        }
    }

    /// Cached plan or a freshly generated one, under the SWR contract.
    /// A cached value that fails to deserialize falls back to `plan_fn`.
    pub async fn get_or_plan<F, Fut>(
        &self,
        query: &str,
        context: Option<&Value>,
        plan_fn: F,
    ) -> Result<ToolPlan, AgentError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ToolPlan, AgentError>> + Send + 'static,
    {
        let producer = {
            let plan_fn = plan_fn.clone();
            move || {
                let plan_fn = plan_fn.clone();
                async move {
                    let plan = plan_fn().await?;
                    serde_json::to_value(&plan).map_err(AgentError::from)
                }
            }
        };
        let value = self
            .inner
            .get_or_compute(&Self::cache_key(query, context), producer, None)
            .await?;
        match serde_json::from_value(value) {
            Ok(plan) => Ok(plan),
            Err(e) => {
                warn!(error = %e, "cached plan no longer deserializes, replanning");
                plan_fn().await
            }
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats()
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new()
    }
}
