//! The orchestrating agent: plan through the cache hierarchy, execute the
//! tool DAG, synthesize a reply, stream structured progress throughout.
//!
//! Request lifecycle: append user message (compaction may fire) → circuit
//! breaker gate → plan (L1/L2/plan-cache/L3) → conversational fallback for
//! empty plans, otherwise convert to steps (tool-cache wrapping), execute,
//! record outcomes into decision memory → synthesize through the completion
//! cache → append assistant message, emit the final `message` event with
//! timings and a context snapshot. A request-level failure emits `error`
//! and appends nothing.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agent_event::{AgentEvent, SessionEvent, Timing};

use crate::cache::{CacheStatsSnapshot, CompletionCache, ToolCache};
use crate::context::{ContextManagerStats, ContextWindowManager, Role, SmartCompactor};
use crate::embedding::Embedder;
use crate::error::AgentError;
use crate::exec::{DagExecutor, StepStatus};
use crate::llm::{CompletionParams, LanguageModel};
use crate::memory::{DecisionMemory, DecisionMemoryStats};
use crate::plan::{PlannerStatsSnapshot, SmartPlanner};
use crate::session::SessionContext;
use crate::stream::{EventSink, StreamingSession};
use crate::tools::{CachedTool, ToolRegistry};

use super::synthesis::{build_conversational_prompt, build_synthesis_prompt};
use super::{Agent, AgentReply};

/// Agent tuning knobs.
#[derive(Clone, Debug)]
pub struct EnhancedAgentConfig {
    pub agent_id: String,
    pub max_parallel: usize,
    /// Base delay for the executor's exponential backoff.
    pub retry_delay: Duration,
    /// Sampling for synthesis; 0.7 keeps replies natural (and bypasses the
    /// completion-cache lookup while still writing through).
    pub synthesis_params: CompletionParams,
    /// Trailing conversation messages included in the synthesis prompt.
    pub history_tail: usize,
    /// Event channel capacity for one request's stream.
    pub channel_capacity: usize,
}

impl Default for EnhancedAgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "enhanced".to_string(),
            max_parallel: 10,
            retry_delay: Duration::from_secs(1),
            synthesis_params: CompletionParams::default().with_temperature(0.7),
            history_tail: 3,
            channel_capacity: 64,
        }
    }
}

/// Merged statistics across the agent and its components.
#[derive(Clone, Debug, Serialize)]
pub struct AgentStatsSnapshot {
    pub queries_handled: u64,
    pub context_compactions: u64,
    pub avg_response_time_ms: u64,
    pub planner: PlannerStatsSnapshot,
    pub decision_memory: DecisionMemoryStats,
    pub completion_cache: Option<CacheStatsSnapshot>,
    pub tool_cache: Option<CacheStatsSnapshot>,
    pub context: ContextManagerStats,
}

#[derive(Default)]
struct AgentStats {
    queries_handled: u64,
    context_compactions: u64,
    avg_response_time_ms: u64,
}

struct AgentInner {
    config: EnhancedAgentConfig,
    llm: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    planner: Arc<SmartPlanner>,
    decision_memory: Arc<DecisionMemory>,
    context: Arc<ContextWindowManager>,
    completion_cache: Option<Arc<CompletionCache>>,
    tool_cache: Option<Arc<ToolCache>>,
    sink: Option<Arc<dyn EventSink>>,
    stats: Mutex<AgentStats>,
}

/// The orchestrating agent. Cheap to clone; clones share all components.
#[derive(Clone)]
pub struct EnhancedAgent {
    inner: Arc<AgentInner>,
}

/// Builder in the `with_*` style. Caching and context management are on by
/// default; an embedder enables the semantic planner layer and semantic
/// duplicate-question detection.
pub struct EnhancedAgentBuilder {
    llm: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    embedder: Option<Arc<dyn Embedder>>,
    sink: Option<Arc<dyn EventSink>>,
    enable_caching: bool,
    completion_cache: Option<Arc<CompletionCache>>,
    tool_cache: Option<Arc<ToolCache>>,
    config: EnhancedAgentConfig,
}

impl EnhancedAgentBuilder {
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Disables the completion and tool caches (planning caches stay).
    pub fn without_caches(mut self) -> Self {
        self.enable_caching = false;
        self
    }

    /// Supplies a shared completion cache (e.g. one cache across agents).
    pub fn with_completion_cache(mut self, cache: Arc<CompletionCache>) -> Self {
        self.completion_cache = Some(cache);
        self
    }

    /// Supplies a shared tool cache; also how hosts keep a handle for
    /// webhook-driven invalidation.
    pub fn with_tool_cache(mut self, cache: Arc<ToolCache>) -> Self {
        self.tool_cache = Some(cache);
        self
    }

    pub fn with_config(mut self, config: EnhancedAgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> EnhancedAgent {
        let mut planner = SmartPlanner::new(Arc::clone(&self.llm), Arc::clone(&self.registry));
        let mut decision_memory = DecisionMemory::new();
        if let Some(embedder) = &self.embedder {
            planner = planner.with_embedder(Arc::clone(embedder));
            decision_memory = decision_memory.with_embedder(Arc::clone(embedder));
        }

        let context = ContextWindowManager::new()
            .with_compactor(SmartCompactor::with_model(Arc::clone(&self.llm)));

        let completion_cache = self
            .completion_cache
            .or_else(|| self.enable_caching.then(|| Arc::new(CompletionCache::new())));
        let tool_cache = self
            .tool_cache
            .or_else(|| self.enable_caching.then(|| Arc::new(ToolCache::new())));

        EnhancedAgent {
            inner: Arc::new(AgentInner {
                llm: self.llm,
                registry: self.registry,
                planner: Arc::new(planner),
                decision_memory: Arc::new(decision_memory),
                context: Arc::new(context),
                completion_cache,
                tool_cache,
                sink: self.sink,
                config: self.config,
                stats: Mutex::new(AgentStats::default()),
            }),
        }
    }
}

impl EnhancedAgent {
    pub fn builder(
        llm: Arc<dyn LanguageModel>,
        registry: Arc<ToolRegistry>,
    ) -> EnhancedAgentBuilder {
        EnhancedAgentBuilder {
            llm,
            registry,
            embedder: None,
            sink: None,
            enable_caching: true,
            completion_cache: None,
            tool_cache: None,
            config: EnhancedAgentConfig::default(),
        }
    }

    /// Streams one request's events. The stream is finite: it ends after
    /// the final `message` (or `error`) event.
    pub fn stream_events(
        &self,
        message: &str,
        ctx: &SessionContext,
    ) -> ReceiverStream<SessionEvent> {
        self.stream_events_with_cancellation(message, ctx, CancellationToken::new())
    }

    /// Streaming with caller-driven cancellation: in-flight executor steps
    /// abort at their next suspension point and the stream closes.
    pub fn stream_events_with_cancellation(
        &self,
        message: &str,
        ctx: &SessionContext,
        cancel: CancellationToken,
    ) -> ReceiverStream<SessionEvent> {
        let (tx, rx) = mpsc::channel(self.inner.config.channel_capacity);
        let mut session =
            StreamingSession::new(ctx.session_id(), &self.inner.config.agent_id).with_channel(tx);
        if let Some(sink) = &self.inner.sink {
            session = session.with_sink(Arc::clone(sink));
        }
        let session = Arc::new(session);

        let inner = Arc::clone(&self.inner);
        let message = message.to_string();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            inner.handle_request(&message, &ctx, session, cancel).await;
        });

        ReceiverStream::new(rx)
    }

    /// Discards a session's conversation state (new chat, fresh budget).
    pub fn reset_session(&self, session_id: &str) {
        self.inner.context.reset_session(session_id);
    }

    /// Clears decision history and the circuit breaker.
    pub fn clear_decision_memory(&self) {
        self.inner.decision_memory.clear();
    }

    pub fn decision_memory(&self) -> &DecisionMemory {
        &self.inner.decision_memory
    }

    pub fn context_manager(&self) -> &ContextWindowManager {
        &self.inner.context
    }

    /// The tool cache, when enabled. This is the handle hosts use for
    /// webhook-driven invalidation (`invalidate_tool`).
    pub fn tool_cache(&self) -> Option<&Arc<ToolCache>> {
        self.inner.tool_cache.as_ref()
    }

    pub fn stats(&self) -> AgentStatsSnapshot {
        let stats = self
            .inner
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        AgentStatsSnapshot {
            queries_handled: stats.queries_handled,
            context_compactions: stats.context_compactions,
            avg_response_time_ms: stats.avg_response_time_ms,
            planner: self.inner.planner.stats(),
            decision_memory: self.inner.decision_memory.stats(),
            completion_cache: self.inner.completion_cache.as_ref().map(|c| c.stats()),
            tool_cache: self.inner.tool_cache.as_ref().map(|c| c.stats()),
            context: self.inner.context.stats(),
        }
    }
}

impl AgentInner {
    async fn handle_request(
        &self,
        message: &str,
        ctx: &SessionContext,
        session: Arc<StreamingSession>,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.queries_handled += 1;
        }
        let session_id = ctx.session_id();

        let compacted = self.context.add_message(session_id, Role::User, message).await;
        if compacted {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.context_compactions += 1;
            info!(session = %session_id, "context auto-compacted");
        }

        if self.decision_memory.should_early_exit() {
            session
                .emit_error(
                    "circuit_open",
                    "Too many failed attempts. Please try rephrasing your request.",
                    true,
                    Some("rephrase".to_string()),
                )
                .await;
            return;
        }

        session.emit_reasoning("plan", "Analyzing your request...").await;
        let plan_start = Instant::now();
        let digest = ctx.plan_digest();
        let plan = match self.planner.plan(message, digest.as_ref()).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "planning failed");
                session.emit_error(e.kind(), e.to_string(), false, None).await;
                return;
            }
        };
        let plan_ms = plan_start.elapsed().as_millis() as u64;
        info!(plan_ms, tools = plan.tools.len(), "plan ready");

        if cancel.is_cancelled() {
            return;
        }

        if plan.is_conversational() {
            self.handle_conversational(message, session_id, &session, started, plan_ms)
                .await;
            return;
        }

        session.emit_plan(&plan).await;
        session
            .emit_reasoning(
                "execute",
                format!("Executing {} tools in parallel...", plan.tools.len()),
            )
            .await;

        let mut steps = DagExecutor::from_tool_plan(&plan, &self.registry, None);
        if let Some(tool_cache) = &self.tool_cache {
            for step in &mut steps {
                step.tool = Arc::new(CachedTool::new(
                    Arc::clone(&step.tool),
                    Arc::clone(tool_cache),
                ));
            }
        }

        let executor = DagExecutor::new()
            .with_max_parallel(self.config.max_parallel)
            .with_retry_delay(self.config.retry_delay)
            .with_session(Arc::clone(&session));
        let result = executor
            .execute_plan_with_cancellation(steps, true, cancel.clone())
            .await;
        let execution_ms = result.total_duration.as_millis() as u64;
        info!(
            execution_ms,
            succeeded = result.results.len(),
            failed = result.errors.len(),
            "tools executed"
        );

        // Nothing ran at all: the plan deadlocked before a single tool could
        // start. That invalidates the request as a whole.
        let deadlocked = !result.step_details.is_empty()
            && result
                .step_details
                .values()
                .all(|d| d.status == StepStatus::Skipped);
        if deadlocked {
            session
                .emit_error(
                    "execution",
                    "Execution deadlocked: no tool could run (unmet dependencies)",
                    false,
                    None,
                )
                .await;
            return;
        }

        // A cancelled request stops here; aborted attempts are not
        // failures for the circuit breaker.
        if cancel.is_cancelled() {
            return;
        }

        // Feed the circuit breaker with each step's outcome.
        let empty_args = Value::Object(serde_json::Map::new());
        for (name, value) in &result.results {
            self.decision_memory
                .record_tool_execution(name, &empty_args, Some(value.clone()));
        }
        for (name, error) in &result.errors {
            self.decision_memory.record_tool_execution(
                name,
                &empty_args,
                Some(serde_json::json!({ "error": error })),
            );
        }

        session.emit_reasoning("synthesize", "Synthesizing response...").await;
        let synthesis_start = Instant::now();
        let history = self.context.context_for_llm(session_id, true).await;
        let prompt = build_synthesis_prompt(
            message,
            &plan,
            &result.results,
            &result.errors,
            &history,
            self.config.history_tail,
        );
        let response = match self.complete_with_cache(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "synthesis failed");
                session
                    .emit_error(e.kind(), format!("I encountered an error: {}", e), false, None)
                    .await;
                return;
            }
        };
        let synthesis_ms = synthesis_start.elapsed().as_millis() as u64;

        self.context
            .add_message(session_id, Role::Assistant, &response)
            .await;

        let mut tools_used: Vec<String> = result.results.keys().cloned().collect();
        tools_used.sort();
        let timing = Timing {
            total_ms: started.elapsed().as_millis() as u64,
            plan_ms,
            execution_ms,
            synthesis_ms,
        };
        let context_usage = serde_json::to_value(self.context.token_usage(session_id).await).ok();
        session
            .emit_message(response, tools_used, timing, context_usage)
            .await;

        self.update_response_time(started);
    }

    async fn handle_conversational(
        &self,
        message: &str,
        session_id: &str,
        session: &Arc<StreamingSession>,
        started: Instant,
        plan_ms: u64,
    ) {
        session
            .emit_reasoning("respond", "Processing conversationally...")
            .await;
        let synthesis_start = Instant::now();
        let history = self.context.context_for_llm(session_id, true).await;
        let prompt = build_conversational_prompt(&history);
        let response = match self.complete_with_cache(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "conversational reply failed");
                session
                    .emit_error(e.kind(), format!("I encountered an error: {}", e), false, None)
                    .await;
                return;
            }
        };
        let synthesis_ms = synthesis_start.elapsed().as_millis() as u64;

        self.context
            .add_message(session_id, Role::Assistant, &response)
            .await;

        let timing = Timing {
            total_ms: started.elapsed().as_millis() as u64,
            plan_ms,
            execution_ms: 0,
            synthesis_ms,
        };
        let context_usage = serde_json::to_value(self.context.token_usage(session_id).await).ok();
        session
            .emit_message(response, Vec::new(), timing, context_usage)
            .await;

        self.update_response_time(started);
    }

    async fn complete_with_cache(&self, prompt: &str) -> Result<String, AgentError> {
        let params = self.config.synthesis_params.clone();
        match &self.completion_cache {
            Some(cache) => {
                let llm = Arc::clone(&self.llm);
                let owned_prompt = prompt.to_string();
                let gen_params = params.clone();
                let generate = move || {
                    let llm = Arc::clone(&llm);
                    let prompt = owned_prompt.clone();
                    let params = gen_params.clone();
                    async move { llm.complete(&prompt, &params).await }
                };
                cache
                    .get_or_generate(prompt, self.llm.model_id(), &params, generate)
                    .await
            }
            None => self.llm.complete(prompt, &params).await,
        }
    }

    fn update_response_time(&self, started: Instant) {
        let elapsed = started.elapsed().as_millis() as u64;
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let handled = stats.queries_handled.max(1);
        stats.avg_response_time_ms =
            (stats.avg_response_time_ms * (handled - 1) + elapsed) / handled;
    }
}

#[async_trait]
impl Agent for EnhancedAgent {
    fn name(&self) -> &str {
        &self.inner.config.agent_id
    }

    async fn run(&self, message: &str, ctx: &SessionContext) -> Result<AgentReply, AgentError> {
        let mut stream = self.stream_events(message, ctx);
        while let Some(event) = stream.next().await {
            match event.event {
                AgentEvent::Message {
                    content,
                    tools_used,
                    timing,
                    context_usage,
                } => {
                    return Ok(AgentReply {
                        content,
                        tools_used,
                        timing: timing.unwrap_or_default(),
                        context_usage,
                    });
                }
                AgentEvent::Error {
                    error_type,
                    message,
                    ..
                } => {
                    return Err(match error_type.as_str() {
                        "planning" => AgentError::Planning(message),
                        "circuit_open" => AgentError::CircuitOpen,
                        "cancelled" => AgentError::Cancelled,
                        _ => AgentError::Llm(message),
                    });
                }
                _ => {}
            }
        }
        Err(AgentError::Llm(
            "event stream ended without a response".to_string(),
        ))
    }

    async fn stream(&self, message: &str, ctx: &SessionContext) -> ReceiverStream<SessionEvent> {
        self.stream_events(message, ctx)
    }
}
