//! Language model abstraction for planning, synthesis, and summarization.
//!
//! The orchestrator makes three kinds of model calls: structured planning
//! (`complete_json`), final response synthesis, and conversation
//! summarization during compaction. This module defines the trait plus a
//! mock implementation; `OpenAiChat` is the OpenAI-compatible client.

mod mock;
mod openai;

pub use mock::MockModel;
pub use openai::OpenAiChat;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;

/// Sampling parameters for one completion call. All fields participate in
/// the completion cache key.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionParams {
    /// Sampling temperature. Above 0.5 the completion cache skips lookup.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1024,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }
}

impl CompletionParams {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Strips a single Markdown code fence (``` or ```json) wrapping `text`,
/// returning the inner content. Text without a fence is returned trimmed.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(trimmed)
}

/// Language model client: prompt in, text out.
///
/// Implementations: [`MockModel`] (scripted responses for tests) and
/// [`OpenAiChat`] (OpenAI-compatible API). The orchestrator holds one model
/// behind `Arc<dyn LanguageModel>`; `model_id` participates in completion
/// cache keys.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stable identifier of the underlying model (e.g. "gpt-4o-mini").
    fn model_id(&self) -> &str;

    /// One completion call: prompt in, assistant text out.
    async fn complete(&self, prompt: &str, params: &CompletionParams)
        -> Result<String, AgentError>;

    /// Completion that must return JSON: appends a JSON-only instruction,
    /// strips Markdown fences from the response, and parses it.
    ///
    /// Fails with [`AgentError::Json`] when the (unfenced) response is not
    /// valid JSON.
    async fn complete_json(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<Value, AgentError> {
        let json_prompt = format!(
            "{}\n\nRespond with valid JSON only, no markdown code blocks.",
            prompt
        );
        let response = self.complete(&json_prompt, params).await?;
        let stripped = strip_code_fences(&response);
        Ok(serde_json::from_str(stripped)?)
    }
}
