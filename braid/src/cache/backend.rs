//! Pluggable cache backend: string keys, serialized entries.
//!
//! The in-memory implementation is required and doubles as the fallback
//! when a remote backend fails. `retention` is how long the backend must
//! keep an entry physically present: TTL plus the stale-while-revalidate
//! grace, so stale-but-in-grace reads still find it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::error::CacheError;

/// Storage backend for caches. All operations are async so remote backends
/// (when a host plugs one in) suspend instead of blocking.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, retention: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Keys starting with `prefix`, for prefix invalidation.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

struct StoredEntry {
    payload: String,
    evict_at: Instant,
}

/// In-process backend on a concurrent map. Entries are evicted lazily once
/// past their retention.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.evict_at > Instant::now() {
                return Ok(Some(entry.payload.clone()));
            }
        } else {
            return Ok(None);
        }
        // Past retention: drop it.
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, retention: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                payload: value,
                evict_at: Instant::now() + retention,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.value().evict_at > now && e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_are_evicted_after_retention() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", "v".to_string(), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn scan_matches_prefix_only() {
        let backend = InMemoryBackend::new();
        for key in ["tool:search_emails:a", "tool:search_emails:b", "tool:get_event:c"] {
            backend
                .set(key, "v".to_string(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        let mut keys = backend.scan("tool:search_emails:").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "tool:search_emails:a".to_string(),
                "tool:search_emails:b".to_string()
            ]
        );
    }
}
