//! OpenAI Embeddings implementation of [`Embedder`].
//!
//! Requires `OPENAI_API_KEY` (or custom config). Default model is
//! `text-embedding-3-small` (1536 dimensions).

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

use crate::error::AgentError;

use super::Embedder;

/// OpenAI Embeddings client implementing [`Embedder`].
pub struct OpenAiEmbedder {
    config: OpenAIConfig,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    /// Creates an embedder for `model`, reading the API key from
    /// `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config: OpenAIConfig::new(),
            model,
            dimensions,
        }
    }

    /// Creates an embedder with custom configuration (API key, base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config,
            model,
            dimensions,
        }
    }

    fn model_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            _ => 1536,
        }
    }
}

impl Default for OpenAiEmbedder {
    fn default() -> Self {
        Self::new("text-embedding-3-small")
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AgentError> {
        let inputs: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let input = if inputs.len() == 1 {
            EmbeddingInput::String(inputs.into_iter().next().unwrap_or_default())
        } else {
            EmbeddingInput::StringArray(inputs)
        };

        let request = CreateEmbeddingRequest {
            input,
            model: self.model.clone(),
            ..Default::default()
        };

        let client = Client::with_config(self.config.clone());
        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| AgentError::Embedding(format!("OpenAI API error: {}", e)))?;

        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_dimensions_table() {
        assert_eq!(OpenAiEmbedder::model_dimensions("text-embedding-3-small"), 1536);
        assert_eq!(OpenAiEmbedder::model_dimensions("text-embedding-3-large"), 3072);
        assert_eq!(OpenAiEmbedder::model_dimensions("text-embedding-ada-002"), 1536);
        assert_eq!(OpenAiEmbedder::model_dimensions("unknown-model"), 1536);
    }

    #[test]
    fn with_config_sets_model_and_dimension() {
        let config = OpenAIConfig::new().with_api_key("test-key");
        let embedder = OpenAiEmbedder::with_config(config, "text-embedding-3-large");
        assert_eq!(embedder.dimension(), 3072);
    }

    #[tokio::test]
    #[ignore = "Requires OPENAI_API_KEY"]
    async fn embed_with_real_api_returns_vectors() {
        std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set for this test");

        let embedder = OpenAiEmbedder::default();
        let vectors = embedder.embed(&["Hello, world!"]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 1536);
    }
}
