//! Completion cache: caches model responses keyed by the full sampling
//! configuration.
//!
//! Time-sensitive prompts (mentions of "today", "now", ...) get a 4 h TTL
//! instead of 24 h. Above temperature 0.5 the lookup is skipped entirely
//! (high-randomness requests always regenerate), but successful responses
//! are still written so identical-temperature requests can benefit.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::AgentError;
use crate::llm::CompletionParams;

use super::{compute_key, CacheBackend, CacheConfig, CacheStatsSnapshot, SwrCache};
use std::sync::Arc;

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const TIME_SENSITIVE_TTL: Duration = Duration::from_secs(4 * 60 * 60);
const GRACE: Duration = Duration::from_secs(60 * 60);

/// Lookup is skipped above this sampling temperature.
const CACHE_TEMPERATURE_CEILING: f32 = 0.5;

static TEMPORAL_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\btoday\b",
        r"\bnow\b",
        r"\bcurrent\b",
        r"\bthis (morning|afternoon|evening|week|month)\b",
        r"\btomorrow\b",
        r"\byesterday\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("temporal marker pattern"))
    .collect()
});

/// Cache for LLM completions.
#[derive(Clone)]
pub struct CompletionCache {
    inner: SwrCache,
}

impl CompletionCache {
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
            key_prefix: "llm",
        }
    }

    /// True when the prompt mentions a temporal marker, shortening the TTL.
    pub fn is_time_sensitive(prompt: &str) -> bool {
        let lower = prompt.to_lowercase();
        TEMPORAL_MARKERS.iter().any(|re| re.is_match(&lower))
    }

    fn ttl_for(prompt: &str) -> Duration {
        if Self::is_time_sensitive(prompt) {
            TIME_SENSITIVE_TTL
        } else {
            DEFAULT_TTL
        }
    }

    fn cache_key(prompt: &str, model_id: &str, params: &CompletionParams) -> String {
        let mut parts: Vec<String> = vec![
            prompt.to_string(),
            model_id.to_string(),
            format!("temp={}", params.temperature),
            format!("max_tokens={}", params.max_tokens),
        ];
        if let Some(top_p) = params.top_p {
            parts.push(format!("top_p={}", top_p));
        }
        if let Some(fp) = params.frequency_penalty {
            parts.push(format!("frequency_penalty={}", fp));
        }
        if let Some(pp) = params.presence_penalty {
            parts.push(format!("presence_penalty={}", pp));
        }
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        compute_key(&refs)
    }

    /// Fresh cached completion, if any.
    pub async fn get_cached(
        &self,
        prompt: &str,
        model_id: &str,
        params: &CompletionParams,
    ) -> Option<String> {
        let key = Self::cache_key(prompt, model_id, params);
        self.inner
            .get(&key)
            .await
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Writes a completion with the prompt-dependent TTL.
    pub async fn store(
        &self,
        prompt: &str,
        model_id: &str,
        params: &CompletionParams,
        response: &str,
    ) {
        let key = Self::cache_key(prompt, model_id, params);
        self.inner
            .set(
                &key,
                Value::String(response.to_string()),
                Some(Self::ttl_for(prompt)),
            )
            .await;
    }

    /// Cached completion or a fresh generation.
    ///
    /// Above temperature 0.5 the lookup is bypassed but the result is still
    /// written. Otherwise the full stale-while-revalidate contract applies.
    pub async fn get_or_generate<F, Fut>(
        &self,
        prompt: &str,
        model_id: &str,
        params: &CompletionParams,
        generate: F,
    ) -> Result<String, AgentError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, AgentError>> + Send + 'static,
    {
        if params.temperature > CACHE_TEMPERATURE_CEILING {
            let response = generate().await?;
            self.store(prompt, model_id, params, &response).await;
            return Ok(response);
        }

        let key = Self::cache_key(prompt, model_id, params);
        let value = self
            .inner
            .get_or_compute(
                &key,
                move || {
                    let generate = generate.clone();
                    async move { generate().await.map(Value::String) }
                },
                Some(Self::ttl_for(prompt)),
            )
            .await?;
        Ok(value
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()))
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats()
    }
}

impl Default for CompletionCache {
    fn default() -> Self {
        Self::new()
    }
}
