//! Tool result cache with per-tool TTLs and prefix invalidation.
//!
//! Keys are `{tool_name}:{hash(sorted args)}` so a webhook can invalidate
//! everything a provider update staled with `invalidate_tool(tool_name)`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::AgentError;

use super::{compute_key, CacheBackend, CacheConfig, CacheStatsSnapshot, SwrCache};

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const GRACE: Duration = Duration::from_secs(300);

/// Per-tool TTLs in seconds. Provider data that changes slowly (calendar)
/// keeps longer than volatile data (current weather).
const TOOL_TTL_SECS: &[(&str, u64)] = &[
    ("search_emails", 7200),
    ("get_email", 7200),
    ("get_inbox_items", 7200),
    ("get_todays_events", 14400),
    ("get_upcoming_events", 14400),
    ("get_event", 14400),
    ("get_current_weather", 1800),
    ("get_weather_forecast", 3600),
    ("get_priority_items", 7200),
    ("plan_day", 14400),
];

/// Cache for tool execution results.
#[derive(Clone)]
pub struct ToolCache {
    inner: SwrCache,
}

impl ToolCache {
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
            ttl: DEFAULT_TTL,
            swr_grace: GRACE,
            key_prefix: "tool",
        }
    }

    /// TTL for a specific tool (default 1 h for unknown tools).
    pub fn ttl_for(tool_name: &str) -> Duration {
        TOOL_TTL_SECS
            .iter()
            .find(|(name, _)| *name == tool_name)
            .map(|(_, secs)| Duration::from_secs(*secs))
            .unwrap_or(DEFAULT_TTL)
    }

    /// Sorted `key=value` canonicalization of a JSON-object argument map.
    fn canonical_args(args: &Value) -> String {
        match args.as_object() {
            Some(map) => {
                let mut pairs: Vec<String> =
                    map.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                pairs.sort();
                pairs.join(",")
            }
            None => args.to_string(),
        }
    }

    fn cache_key(tool_name: &str, args: &Value) -> String {
        format!(
            "{}:{}",
            tool_name,
            compute_key(&[tool_name, &Self::canonical_args(args)])
        )
    }

    /// Fresh cached result for `(tool, args)`, if any.
    pub async fn get_cached(&self, tool_name: &str, args: &Value) -> Option<Value> {
        self.inner.get(&Self::cache_key(tool_name, args)).await
    }

    /// Caches a result with the tool's TTL.
    pub async fn store(&self, tool_name: &str, args: &Value, result: Value) {
        self.inner
            .set(
                &Self::cache_key(tool_name, args),
                result,
                Some(Self::ttl_for(tool_name)),
            )
            .await;
    }

    /// Cached result or a fresh execution, under the SWR contract.
    pub async fn get_or_execute<F, Fut>(
        &self,
        tool_name: &str,
        args: &Value,
        execute: F,
    ) -> Result<Value, AgentError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        self.inner
            .get_or_compute(
                &Self::cache_key(tool_name, args),
                execute,
                Some(Self::ttl_for(tool_name)),
            )
            .await
    }

    /// Invalidates every cached result for one tool (webhook-driven
    /// invalidation of stale provider data). Returns removed entry count.
    pub async fn invalidate_tool(&self, tool_name: &str) -> usize {
        self.inner
            .invalidate_by_prefix(&format!("{}:", tool_name))
            .await
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats()
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new()
    }
}
