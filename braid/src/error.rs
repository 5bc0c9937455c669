//! Orchestration error types.
//!
//! Used across planning, execution, synthesis, and the caches' compute
//! paths. Module-local concerns (cache backends, tools, sinks) have their
//! own focused error enums and convert into `AgentError` where they cross
//! into orchestration.

use std::time::Duration;

use thiserror::Error;

/// Orchestration error.
///
/// Planning and synthesis failures terminate the request; tool failures are
/// recorded per step and the request continues (see `ExecutionResult`).
#[derive(Debug, Error)]
pub enum AgentError {
    /// LLM call failed (transport, provider, or empty response).
    #[error("llm call failed: {0}")]
    Llm(String),

    /// Embedding call failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The planner could not produce a valid plan (malformed model output twice).
    #[error("planning failed: {0}")]
    Planning(String),

    /// A tool invocation failed after retries.
    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    /// A tool invocation exceeded its timeout.
    #[error("tool '{name}' timed out after {timeout:?}")]
    ToolTimeout { name: String, timeout: Duration },

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// The circuit breaker is open after repeated failures.
    #[error("circuit breaker open: too many failed attempts")]
    CircuitOpen,

    /// Model output that should have been JSON could not be parsed.
    #[error("invalid JSON in model output: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Short kind tag used as `error_type` in emitted error events.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Llm(_) => "llm",
            AgentError::Embedding(_) => "embedding",
            AgentError::Planning(_) => "planning",
            AgentError::Tool { .. } => "tool",
            AgentError::ToolTimeout { .. } => "tool_timeout",
            AgentError::Cancelled => "cancelled",
            AgentError::CircuitOpen => "circuit_open",
            AgentError::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display format names the failing tool and message.
    #[test]
    fn tool_error_display_contains_name_and_message() {
        let err = AgentError::Tool {
            name: "search_emails".to_string(),
            message: "backend unavailable".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("search_emails"), "{}", s);
        assert!(s.contains("backend unavailable"), "{}", s);
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(AgentError::Planning("x".into()).kind(), "planning");
        assert_eq!(AgentError::Cancelled.kind(), "cancelled");
        assert_eq!(AgentError::CircuitOpen.kind(), "circuit_open");
    }

    #[test]
    fn json_error_converts_via_from() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: AgentError = parse_err.into();
        assert_eq!(err.kind(), "json");
    }
}
