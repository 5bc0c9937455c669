//! Embedding abstraction for semantic plan lookup and duplicate-question
//! detection.
//!
//! Semantic features degrade cleanly when no embedder is configured: the
//! semantic cache becomes a no-op and DecisionMemory falls back to exact
//! matching. Implementations: [`MockEmbedder`] for tests, [`OpenAiEmbedder`]
//! for the OpenAI Embeddings API.

mod mock;
mod openai;

pub use mock::MockEmbedder;
pub use openai::OpenAiEmbedder;

use async_trait::async_trait;

use crate::error::AgentError;

/// Produces fixed-size float vectors from text.
///
/// Implementations must be `Send + Sync`; the planner and decision memory
/// hold one behind `Arc<dyn Embedder>`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each text into a vector of dimension [`Embedder::dimension`].
    /// Returns one vector per input text in the same order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AgentError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}

/// Cosine similarity over matching dimensions. Returns 0.0 when either
/// vector has zero norm or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5f32, 1.0, -2.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6, "got {}", sim);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_zero_norm_and_length_mismatch() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
