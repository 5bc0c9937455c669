//! TTL + stale-while-revalidate caching for plans, tool results, and
//! completions.
//!
//! One mechanism ([`SwrCache`]) with three configurations that differ only
//! in key construction and TTLs ([`PlanCache`], [`ToolCache`],
//! [`CompletionCache`]). Freshness decision per entry at read time `t`:
//!
//! - `t < expires_at`: fresh, return immediately (hit).
//! - `expires_at <= t < expires_at + grace`: stale, return the stale value
//!   immediately and refresh in a background task; background failures are
//!   logged, never surfaced.
//! - otherwise: miss. Await the producer, store, return. A producer
//!   failure on this path propagates and is never cached.
//!
//! Backend failures fall back to a private in-process map with identical
//! semantics. All operations are safe for concurrent use.

mod backend;
mod completion;
mod error;
mod plan;
mod tool;

pub use backend::{CacheBackend, InMemoryBackend};
pub use completion::CompletionCache;
pub use error::CacheError;
pub use plan::PlanCache;
pub use tool::ToolCache;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::AgentError;

/// Configuration for one cache: default TTL, stale-while-revalidate grace,
/// and the key namespace prefix.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub swr_grace: Duration,
    pub key_prefix: &'static str,
}

/// One stored entry. Invariant: `expires_at > cached_at`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    /// Epoch milliseconds at write time.
    pub cached_at: u64,
    /// Epoch milliseconds after which the entry is stale.
    pub expires_at: u64,
}

/// Point-in-time counters for one cache. Stale-but-served reads count as
/// hits; background revalidations are not re-counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub errors: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_requests: total,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// SHA-256 of the joined parts, truncated to 32 hex chars: stable,
/// fixed-length keys regardless of prompt or argument size.
pub fn compute_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

struct SwrInner {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    fallback: InMemoryBackend,
    stats: CacheStats,
}

/// TTL + stale-while-revalidate cache over a pluggable backend.
///
/// Cheap to clone; all clones share the same backend and counters.
#[derive(Clone)]
pub struct SwrCache {
    inner: Arc<SwrInner>,
}

enum Freshness {
    Fresh(Value),
    Stale(Value),
    Absent,
}

impl SwrCache {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            inner: Arc::new(SwrInner {
                config,
                backend,
                fallback: InMemoryBackend::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Cache with the required in-memory backend.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(InMemoryBackend::new()))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.inner.config.key_prefix, key)
    }

    fn retention(&self, ttl: Duration) -> Duration {
        ttl + self.inner.config.swr_grace
    }

    async fn read_raw(&self, full_key: &str) -> Option<String> {
        match self.inner.backend.get(full_key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %full_key, error = %e, "cache backend get failed, using fallback");
                self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.inner.fallback.get(full_key).await.ok().flatten()
            }
        }
    }

    async fn write_raw(&self, full_key: &str, payload: String, retention: Duration) {
        if let Err(e) = self
            .inner
            .backend
            .set(full_key, payload.clone(), retention)
            .await
        {
            warn!(key = %full_key, error = %e, "cache backend set failed, using fallback");
            self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
            let _ = self.inner.fallback.set(full_key, payload, retention).await;
        }
    }

    async fn read_entry(&self, full_key: &str) -> Freshness {
        let Some(raw) = self.read_raw(full_key).await else {
            return Freshness::Absent;
        };
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %full_key, error = %e, "corrupt cache entry dropped");
                self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
                return Freshness::Absent;
            }
        };
        let now = now_ms();
        let grace_ms = self.inner.config.swr_grace.as_millis() as u64;
        if now < entry.expires_at {
            Freshness::Fresh(entry.value)
        } else if grace_ms > 0 && now < entry.expires_at + grace_ms {
            Freshness::Stale(entry.value)
        } else {
            Freshness::Absent
        }
    }

    /// Fresh-only read. Stale and missing entries both return `None`.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let full_key = self.full_key(key);
        match self.read_entry(&full_key).await {
            Freshness::Fresh(value) => {
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            _ => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Writes an entry with the given TTL (cache default when `None`).
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.inner.config.ttl);
        let now = now_ms();
        let entry = CacheEntry {
            value,
            cached_at: now,
            expires_at: now + ttl.as_millis() as u64,
        };
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "cache entry serialization failed");
                self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let full_key = self.full_key(key);
        self.write_raw(&full_key, payload, self.retention(ttl)).await;
    }

    /// Removes one entry.
    pub async fn invalidate(&self, key: &str) {
        let full_key = self.full_key(key);
        if let Err(e) = self.inner.backend.delete(&full_key).await {
            warn!(key = %full_key, error = %e, "cache backend delete failed");
            self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self.inner.fallback.delete(&full_key).await;
        self.inner.stats.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes every entry whose (un-namespaced) key starts with `prefix`.
    /// Returns the number of keys removed.
    pub async fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let full_prefix = self.full_key(prefix);
        let mut removed = 0usize;
        match self.inner.backend.scan(&full_prefix).await {
            Ok(keys) => {
                for key in keys {
                    if self.inner.backend.delete(&key).await.is_ok() {
                        removed += 1;
                    }
                }
            }
            Err(e) => {
                warn!(prefix = %full_prefix, error = %e, "cache backend scan failed");
                self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Ok(keys) = self.inner.fallback.scan(&full_prefix).await {
            for key in keys {
                if self.inner.fallback.delete(&key).await.is_ok() {
                    removed += 1;
                }
            }
        }
        self.inner
            .stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Freshness-deciding combinator: fresh hit, stale hit with background
    /// refresh, or compute-store-return on miss.
    ///
    /// The producer must be cheaply cloneable so a stale hit can hand a copy
    /// to the background revalidation task.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        producer: F,
        ttl: Option<Duration>,
    ) -> Result<Value, AgentError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        let ttl = ttl.unwrap_or(self.inner.config.ttl);
        let full_key = self.full_key(key);

        match self.read_entry(&full_key).await {
            Freshness::Fresh(value) => {
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Freshness::Stale(value) => {
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                let cache = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    cache.revalidate(&key, producer, ttl).await;
                });
                Ok(value)
            }
            Freshness::Absent => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                let value = producer().await?;
                self.set(key, value.clone(), Some(ttl)).await;
                Ok(value)
            }
        }
    }

    async fn revalidate<F, Fut>(&self, key: &str, producer: F, ttl: Duration)
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value, AgentError>> + Send,
    {
        match producer().await {
            Ok(value) => {
                self.set(key, value, Some(ttl)).await;
                debug!(key = %key, "revalidated cache entry");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "background revalidation failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config(ttl_ms: u64, grace_ms: u64) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_millis(ttl_ms),
            swr_grace: Duration::from_millis(grace_ms),
            key_prefix: "test",
        }
    }

    #[test]
    fn compute_key_is_stable_and_fixed_length() {
        let a = compute_key(&["query", "model", "temp=0.3"]);
        let b = compute_key(&["query", "model", "temp=0.3"]);
        let c = compute_key(&["query", "model", "temp=0.7"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn fresh_entry_is_a_hit() {
        let cache = SwrCache::in_memory(config(60_000, 1_000));
        cache.set("k", serde_json::json!(42), None).await;
        assert_eq!(cache.get("k").await, Some(serde_json::json!(42)));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    /// **Scenario**: within `[expires_at, expires_at + grace)` the stale
    /// value is returned immediately and a background refresh is scheduled.
    #[tokio::test]
    async fn stale_entry_serves_stale_and_revalidates() {
        let cache = SwrCache::in_memory(config(30, 5_000));
        cache.set("k", serde_json::json!("old"), None).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let value = cache
            .get_or_compute(
                "k",
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(serde_json::json!("new"))
                    }
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!("old"));

        // Give the spawned revalidation a moment to land.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("k").await, Some(serde_json::json!("new")));
    }

    #[tokio::test]
    async fn expired_entry_is_recomputed() {
        let cache = SwrCache::in_memory(config(20, 10));
        cache.set("k", serde_json::json!("old"), None).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let value = cache
            .get_or_compute("k", || async { Ok(serde_json::json!("fresh")) }, None)
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!("fresh"));
    }

    /// **Scenario**: a producer failure on the miss path propagates and is
    /// never cached.
    #[tokio::test]
    async fn miss_path_producer_failure_propagates_and_is_not_cached() {
        let cache = SwrCache::in_memory(config(60_000, 1_000));
        let result = cache
            .get_or_compute(
                "k",
                || async { Err::<Value, _>(AgentError::Llm("down".to_string())) },
                None,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn invalidate_by_prefix_removes_matching_keys() {
        let cache = SwrCache::in_memory(config(60_000, 1_000));
        cache.set("search_emails:a", serde_json::json!(1), None).await;
        cache.set("search_emails:b", serde_json::json!(2), None).await;
        cache.set("get_event:c", serde_json::json!(3), None).await;

        let removed = cache.invalidate_by_prefix("search_emails:").await;
        assert_eq!(removed, 2);
        assert_eq!(cache.get("search_emails:a").await, None);
        assert_eq!(cache.get("get_event:c").await, Some(serde_json::json!(3)));
    }

    struct FailingBackend;

    #[async_trait::async_trait]
    impl CacheBackend for FailingBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn set(
            &self,
            _key: &str,
            _value: String,
            _retention: Duration,
        ) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        async fn scan(&self, _prefix: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
    }

    /// **Scenario**: backend failures fall back to the in-process map with
    /// identical semantics; nothing surfaces to the caller.
    #[tokio::test]
    async fn backend_failure_falls_back_to_in_process_map() {
        let cache = SwrCache::new(config(60_000, 1_000), Arc::new(FailingBackend));
        cache.set("k", serde_json::json!("v"), None).await;
        assert_eq!(cache.get("k").await, Some(serde_json::json!("v")));
        assert!(cache.stats().errors > 0);
    }
}
