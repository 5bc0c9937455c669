//! Deterministic embedder for tests: hashed bag-of-words vectors, with the
//! ability to pin exact vectors for specific texts so similarity-threshold
//! scenarios are reproducible.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AgentError;

use super::Embedder;

/// Mock [`Embedder`]: words are hashed into buckets of an L2-normalized
/// vector, so texts sharing words embed similarly. Pin vectors with
/// [`MockEmbedder::with_vector`] when a test needs an exact similarity.
pub struct MockEmbedder {
    dimension: usize,
    pinned: Mutex<HashMap<String, Vec<f32>>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            pinned: Mutex::new(HashMap::new()),
        }
    }

    /// Pins an exact vector for `text` (padded or truncated to the
    /// configured dimension).
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        let mut v = vector;
        v.resize(self.dimension, 0.0);
        self.pinned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(text.into(), v);
        self
    }

    fn hashed_vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            v[bucket] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AgentError> {
        let pinned = self.pinned.lock().unwrap_or_else(|e| e.into_inner());
        Ok(texts
            .iter()
            .map(|t| {
                pinned
                    .get(*t)
                    .cloned()
                    .unwrap_or_else(|| self.hashed_vector(t))
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
