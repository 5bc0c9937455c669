//! OpenAI Chat Completions client implementing [`LanguageModel`].
//!
//! Uses the Chat Completions API with a single user message per call (the
//! orchestrator assembles full prompts itself). Requires `OPENAI_API_KEY`
//! (or explicit config, e.g. for OpenAI-compatible proxies).

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::error::AgentError;

use super::{CompletionParams, LanguageModel};

/// OpenAI Chat Completions client.
///
/// API key from `OPENAI_API_KEY` by default; use [`OpenAiChat::with_config`]
/// for a custom key or base URL.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChat {
    /// Build client with default config (API key from `OPENAI_API_KEY` env).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
        }
    }

    /// Build client with custom config (e.g. custom API key or base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, AgentError> {
        let messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage::from(prompt),
        )];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(messages);
        args.temperature(params.temperature);
        args.max_completion_tokens(params.max_tokens);
        if let Some(top_p) = params.top_p {
            args.top_p(top_p);
        }
        if let Some(fp) = params.frequency_penalty {
            args.frequency_penalty(fp);
        }
        if let Some(pp) = params.presence_penalty {
            args.presence_penalty(pp);
        }

        let request = args
            .build()
            .map_err(|e| AgentError::Llm(format!("request build failed: {}", e)))?;

        debug!(
            model = %self.model,
            prompt_len = prompt.len(),
            temperature = params.temperature,
            "chat completion"
        );

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AgentError::Llm(format!("OpenAI API error: {}", e)))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Llm("OpenAI returned no choices".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}
