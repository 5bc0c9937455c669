//! Scripted model for tests: fixed or queued responses, call counting,
//! optional artificial latency and scripted failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AgentError;

use super::{CompletionParams, LanguageModel};

/// Mock [`LanguageModel`]: returns queued responses in order, then the
/// default response. Can fail the first N calls to exercise retry paths.
pub struct MockModel {
    model_id: String,
    default_response: String,
    queued: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
    fail_first: AtomicUsize,
    delay: Option<Duration>,
}

impl MockModel {
    /// Mock that always returns `response`.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            model_id: "mock-model".to_string(),
            default_response: response.into(),
            queued: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Mock that returns each queued response once (in order), then repeats
    /// the last one.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queued: VecDeque<String> = responses.into_iter().map(Into::into).collect();
        let default_response = queued
            .back()
            .cloned()
            .unwrap_or_default();
        // Keep the last response as the steady-state default.
        if !queued.is_empty() {
            queued.pop_back();
        }
        Self {
            model_id: "mock-model".to_string(),
            default_response,
            queued: Mutex::new(queued),
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Adds artificial latency per call (for timing-sensitive scenarios).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails the first `n` calls with [`AgentError::Llm`] before succeeding.
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        _prompt: &str,
        _params: &CompletionParams,
    ) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentError::Llm("scripted failure".to_string()));
        }
        let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queued
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_responses_are_returned_in_order_then_default() {
        let model = MockModel::with_responses(["first", "second", "steady"]);
        let params = CompletionParams::default();
        assert_eq!(model.complete("p", &params).await.unwrap(), "first");
        assert_eq!(model.complete("p", &params).await.unwrap(), "second");
        assert_eq!(model.complete("p", &params).await.unwrap(), "steady");
        assert_eq!(model.complete("p", &params).await.unwrap(), "steady");
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn failing_first_fails_then_succeeds() {
        let model = MockModel::with_response("ok").failing_first(1);
        let params = CompletionParams::default();
        assert!(model.complete("p", &params).await.is_err());
        assert_eq!(model.complete("p", &params).await.unwrap(), "ok");
    }
}
