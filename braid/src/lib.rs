//! # Braid
//!
//! Concurrent multi-tool agent orchestration in Rust: turn a natural-language
//! request into a dependency-aware parallel execution of tool calls, with
//! caching, loop prevention, streaming progress, and bounded conversation
//! context.
//!
//! ## Design principles
//!
//! - **Plan, then execute**: a [`SmartPlanner`] resolves each query into a
//!   [`ToolPlan`] through a three-tier cache hierarchy (regex patterns →
//!   embedding similarity → plan cache → one model call), and a
//!   [`DagExecutor`] runs the plan with parallelism, retries, timeouts, and
//!   dependency ordering.
//! - **Tools by name**: the process-wide [`ToolRegistry`] owns tools; plans
//!   and steps reference them by name and resolve handles at scheduling
//!   time. Closures normalize into the single [`Tool`] shape at
//!   registration.
//! - **Serve stale, refresh behind**: the plan, tool, and completion caches
//!   share one stale-while-revalidate mechanism ([`SwrCache`]) over a
//!   pluggable [`CacheBackend`].
//! - **Fail small**: a tool failure is recorded per step and the request
//!   continues to synthesis; only planning or synthesis failures terminate
//!   a request. Repeated failures trip [`DecisionMemory`]'s circuit
//!   breaker.
//! - **Bounded context**: the [`ContextWindowManager`] compacts old
//!   conversation history into a summary message near the token budget,
//!   keeping the recent tail verbatim.
//!
//! ## Main modules
//!
//! - [`agent`]: [`Agent`] trait and [`EnhancedAgent`] (plan → execute →
//!   synthesize → stream).
//! - [`plan`]: [`ToolPlan`], [`PatternMatcher`], [`SemanticCache`],
//!   [`SmartPlanner`].
//! - [`exec`]: [`ExecutionStep`], [`ExecutionResult`], [`DagExecutor`].
//! - [`cache`]: [`SwrCache`], [`CompletionCache`], [`ToolCache`],
//!   [`PlanCache`], [`CacheBackend`], [`InMemoryBackend`].
//! - [`memory`]: [`DecisionMemory`] (duplicate budgets, loop detection,
//!   circuit breaker).
//! - [`context`]: [`ContextWindowManager`], [`SmartCompactor`],
//!   [`TokenCounter`].
//! - [`stream`]: [`StreamingSession`] and [`EventSink`] for ordered emission
//!   and fan-out of [`agent_event`] envelopes.
//! - [`tools`]: [`Tool`], [`FnTool`], [`CachedTool`], [`ToolRegistry`].
//! - [`llm`] / [`embedding`]: [`LanguageModel`] and [`Embedder`] seams with
//!   OpenAI-compatible and mock implementations.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use braid::{EnhancedAgent, MockModel, SessionContext, ToolRegistry};
//! use tokio_stream::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = ToolRegistry::new();
//! registry.register_fn("get_current_weather", |_args| async {
//!     Ok(serde_json::json!({"temp_c": 18, "summary": "clear"}))
//! });
//!
//! let llm = Arc::new(MockModel::with_response("Clear skies, 18°C."));
//! let agent = EnhancedAgent::builder(llm, Arc::new(registry)).build();
//!
//! let ctx = SessionContext::new().with_session_id("demo");
//! let mut events = agent.stream_events("how's the weather?", &ctx);
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # }
//! ```

pub mod agent;
pub mod cache;
pub mod context;
pub mod embedding;
pub mod error;
pub mod exec;
pub mod llm;
pub mod memory;
pub mod plan;
pub mod session;
pub mod stream;
pub mod tools;

pub use agent::{
    build_conversational_prompt, build_synthesis_prompt, Agent, AgentReply, AgentStatsSnapshot,
    EnhancedAgent, EnhancedAgentBuilder, EnhancedAgentConfig,
};
pub use cache::{
    CacheBackend, CacheConfig, CacheEntry, CacheError, CacheStatsSnapshot, CompletionCache,
    InMemoryBackend, PlanCache, SwrCache, ToolCache,
};
pub use context::{
    ChatMessage, ContextManagerStats, ContextUsage, ContextWindowManager, ConversationSession,
    HeuristicTokenCounter, MessageEntry, Role, SmartCompactor, TokenCounter,
};
pub use embedding::{cosine_similarity, Embedder, MockEmbedder, OpenAiEmbedder};
pub use error::AgentError;
pub use exec::{DagExecutor, ExecutionResult, ExecutionStep, StepDetail, StepStatus};
pub use llm::{strip_code_fences, CompletionParams, LanguageModel, MockModel, OpenAiChat};
pub use memory::{
    Decision, DecisionKind, DecisionMemory, DecisionMemoryConfig, DecisionMemoryStats,
};
pub use plan::{
    build_planning_prompt, PatternMatcher, PatternRule, PlanValidationError,
    PlannerStatsSnapshot, SemanticCache, SemanticCacheStats, SmartPlanner, SmartPlannerConfig,
    ToolPlan,
};
pub use session::SessionContext;
pub use stream::{EventSink, SinkError, StreamingSession};
pub use tools::{CachedTool, FnTool, Tool, ToolError, ToolRegistry, ToolSpec};

// Re-export the event protocol so hosts depend on one crate.
pub use agent_event::{AgentEvent, AgentPhase, Envelope, SessionEvent, Timing, ToolStatus};

/// When running `cargo test -p braid`, initializes tracing from `RUST_LOG`
/// so unit tests can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
