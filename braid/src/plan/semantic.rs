//! L2 of the planner: embedding-similarity lookup of previously successful
//! plans.
//!
//! Entries pair a query's embedding with its plan. Lookup returns the best
//! match at or above the similarity threshold; storing dedups near-identical
//! queries by refreshing the existing entry. Capacity is bounded with LRU
//! eviction by last use. Embedding failures are logged and treated as a
//! miss; the planner falls through to the next layer.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::embedding::{cosine_similarity, Embedder};

use super::ToolPlan;

const DEFAULT_LOOKUP_THRESHOLD: f32 = 0.80;
const DEFAULT_STORE_DEDUP_THRESHOLD: f32 = 0.85;
const DEFAULT_MAX_ENTRIES: usize = 500;

struct SemanticEntry {
    query: String,
    embedding: Vec<f32>,
    plan: ToolPlan,
    last_used: Instant,
    hits: u64,
}

/// Counters for the semantic cache.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SemanticCacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Embedding-similarity cache of (query, plan) pairs.
pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    entries: Mutex<Vec<SemanticEntry>>,
    similarity_threshold: f32,
    store_dedup_threshold: f32,
    max_entries: usize,
    stats: Mutex<SemanticCacheStats>,
}

impl SemanticCache {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: Mutex::new(Vec::new()),
            similarity_threshold: DEFAULT_LOOKUP_THRESHOLD,
            store_dedup_threshold: DEFAULT_STORE_DEDUP_THRESHOLD,
            max_entries: DEFAULT_MAX_ENTRIES,
            stats: Mutex::new(SemanticCacheStats::default()),
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(&[text]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "query embedding failed, semantic layer misses");
                None
            }
        }
    }

    /// Best stored plan with similarity ≥ threshold, refreshing its LRU
    /// position. `None` on miss or embedding failure.
    pub async fn get_similar(&self, query: &str) -> Option<ToolPlan> {
        let embedding = self.embed_one(query).await?;
        let mut entries = self.entries.lock().await;

        let mut best: Option<(usize, f32)> = None;
        for (idx, entry) in entries.iter().enumerate() {
            let similarity = cosine_similarity(&embedding, &entry.embedding);
            if similarity >= self.similarity_threshold
                && best.map_or(true, |(_, s)| similarity > s)
            {
                best = Some((idx, similarity));
            }
        }

        let mut stats = self.stats.lock().await;
        match best {
            Some((idx, similarity)) => {
                stats.hits += 1;
                let entry = &mut entries[idx];
                entry.last_used = Instant::now();
                entry.hits += 1;
                debug!(
                    query = %query,
                    matched = %entry.query,
                    similarity,
                    "semantic cache hit"
                );
                Some(entry.plan.clone())
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Stores `(query, plan)`. A near-identical stored query (similarity ≥
    /// the dedup threshold) is refreshed in place instead of inserting a
    /// duplicate; at capacity, the least-recently-used entry is evicted.
    pub async fn store(&self, query: &str, plan: ToolPlan) {
        let Some(embedding) = self.embed_one(query).await else {
            return;
        };
        let mut entries = self.entries.lock().await;

        let near_duplicate = entries.iter().position(|entry| {
            cosine_similarity(&embedding, &entry.embedding) >= self.store_dedup_threshold
        });
        if let Some(idx) = near_duplicate {
            let entry = &mut entries[idx];
            entry.query = query.to_string();
            entry.embedding = embedding;
            entry.plan = plan;
            entry.last_used = Instant::now();
            return;
        }

        if entries.len() >= self.max_entries {
            if let Some(lru_idx) = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(idx, _)| idx)
            {
                entries.remove(lru_idx);
                self.stats.lock().await.evictions += 1;
            }
        }

        entries.push(SemanticEntry {
            query: query.to_string(),
            embedding,
            plan,
            last_used: Instant::now(),
            hits: 0,
        });
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn stats(&self) -> SemanticCacheStats {
        let size = self.entries.lock().await.len();
        let mut stats = *self.stats.lock().await;
        stats.size = size;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;

    fn plan_for(tool: &str) -> ToolPlan {
        ToolPlan::all_parallel([tool], "test plan")
    }

    /// **Scenario**: store followed by a lookup of the same query returns an
    /// equal plan (self-similarity is 1.0 ≥ threshold).
    #[tokio::test]
    async fn store_then_get_same_query_round_trips() {
        let cache = SemanticCache::new(Arc::new(MockEmbedder::default()));
        let plan = plan_for("get_todays_events");
        cache.store("What's my day like?", plan.clone()).await;
        let found = cache.get_similar("What's my day like?").await.unwrap();
        assert_eq!(found, plan);
    }

    #[tokio::test]
    async fn similar_query_hits_with_pinned_vectors() {
        let embedder = MockEmbedder::new(4)
            .with_vector("What's my day like?", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("How's my day looking?", vec![0.95, 0.31, 0.0, 0.0]);
        let cache = SemanticCache::new(Arc::new(embedder));
        cache
            .store("What's my day like?", plan_for("get_todays_events"))
            .await;

        let found = cache.get_similar("How's my day looking?").await.unwrap();
        assert_eq!(found.tools, vec!["get_todays_events".to_string()]);
    }

    /// **Scenario**: dissimilar queries miss.
    #[tokio::test]
    async fn dissimilar_query_misses() {
        let cache = SemanticCache::new(Arc::new(MockEmbedder::default()))
            .with_similarity_threshold(0.85);
        cache
            .store("What's my day like?", plan_for("get_todays_events"))
            .await;

        for query in ["What's the weather?", "Search emails from John", "Create a meeting"] {
            if let Some(plan) = cache.get_similar(query).await {
                assert_ne!(
                    plan.tools,
                    vec!["get_todays_events".to_string()],
                    "should not match different query: {}",
                    query
                );
            }
        }
    }

    /// **Scenario**: at capacity the least-recently-used entry is evicted.
    #[tokio::test]
    async fn eviction_keeps_cache_at_capacity() {
        let embedder = MockEmbedder::new(8)
            .with_vector("q1", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .with_vector("q2", vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .with_vector("q3", vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .with_vector("q4", vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        let cache = SemanticCache::new(Arc::new(embedder)).with_max_entries(3);

        for (query, tool) in [("q1", "t1"), ("q2", "t2"), ("q3", "t3"), ("q4", "t4")] {
            cache.store(query, plan_for(tool)).await;
        }

        assert_eq!(cache.len().await, 3);
        // q1 was least recently used and should be gone.
        assert!(cache.get_similar("q1").await.is_none());
        assert!(cache.get_similar("q4").await.is_some());
    }

    #[tokio::test]
    async fn near_duplicate_store_refreshes_instead_of_inserting() {
        let embedder = MockEmbedder::new(4)
            .with_vector("a", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("a variant", vec![0.99, 0.14, 0.0, 0.0]);
        let cache = SemanticCache::new(Arc::new(embedder));

        cache.store("a", plan_for("old")).await;
        cache.store("a variant", plan_for("new")).await;

        assert_eq!(cache.len().await, 1);
        let found = cache.get_similar("a variant").await.unwrap();
        assert_eq!(found.tools, vec!["new".to_string()]);
    }
}
