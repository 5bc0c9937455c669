//! Top-level agent: plan → execute → synthesize → stream.
//!
//! [`Agent`] is the capability seam hosts program against: one-shot `run`
//! or incremental `stream`. [`EnhancedAgent`] is the full orchestrating
//! implementation over the planner, executor, caches, decision memory, and
//! context manager.

mod enhanced;
mod synthesis;

pub use enhanced::{AgentStatsSnapshot, EnhancedAgent, EnhancedAgentBuilder, EnhancedAgentConfig};
pub use synthesis::{build_conversational_prompt, build_synthesis_prompt};

use async_trait::async_trait;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use agent_event::{SessionEvent, Timing};

use crate::error::AgentError;
use crate::session::SessionContext;

/// Final outcome of one request.
#[derive(Clone, Debug)]
pub struct AgentReply {
    pub content: String,
    pub tools_used: Vec<String>,
    pub timing: Timing,
    pub context_usage: Option<Value>,
}

/// Capability record for agents: run to completion, or stream events.
///
/// `stream` produces a finite, non-restartable event sequence: one
/// request, one stream. The final event is `message` on success or `error`
/// on request-level failure; there is never a partial assistant message.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Runs one request to completion.
    async fn run(&self, message: &str, ctx: &SessionContext) -> Result<AgentReply, AgentError>;

    /// Streams one request's events.
    async fn stream(&self, message: &str, ctx: &SessionContext) -> ReceiverStream<SessionEvent>;
}
