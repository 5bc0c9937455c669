//! Per-request event streaming: ordered emission, replay buffer, and
//! fan-out to subscribers.
//!
//! A [`StreamingSession`] stamps every event with the envelope (monotonic
//! event id, timestamp, session id, agent id), appends it to an in-memory
//! replay buffer, forwards it to the request's local channel (the event
//! stream handed to the caller), and broadcasts it through an optional
//! [`EventSink`] (typically a WebSocket room named `agent:{session_id}`).
//! A failing sink is logged and never blocks or fails the emitter.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use agent_event::{AgentEvent, AgentPhase, EnvelopeState, SessionEvent, Timing, ToolStatus};

use crate::plan::ToolPlan;

/// Errors from event fan-out.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// Fan-out boundary for emitted events (WebSocket rooms, SSE, logs, ...).
///
/// Failure on one subscriber must never fail the call; implementations drop
/// the subscriber and continue.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn broadcast(&self, room: &str, event: Value) -> Result<(), SinkError>;
}

/// Per-request append-only event log with fan-out.
pub struct StreamingSession {
    envelope: Mutex<EnvelopeState>,
    session_id: String,
    started_at: Instant,
    buffer: Mutex<Vec<SessionEvent>>,
    local_tx: Option<mpsc::Sender<SessionEvent>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl StreamingSession {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            envelope: Mutex::new(EnvelopeState::new(session_id.clone(), agent_id)),
            session_id,
            started_at: Instant::now(),
            buffer: Mutex::new(Vec::new()),
            local_tx: None,
            sink: None,
        }
    }

    /// Attaches the request's local event channel.
    pub fn with_channel(mut self, tx: mpsc::Sender<SessionEvent>) -> Self {
        self.local_tx = Some(tx);
        self
    }

    /// Attaches a broadcast sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn room(&self) -> String {
        format!("agent:{}", self.session_id)
    }

    /// Emits one event: envelope, buffer, local channel, sink, in that
    /// order. Returns the enveloped event.
    pub async fn emit(&self, event: AgentEvent) -> SessionEvent {
        let enveloped = {
            let mut envelope = self.envelope.lock().unwrap_or_else(|e| e.into_inner());
            envelope.wrap(event)
        };

        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(enveloped.clone());

        if let Some(tx) = &self.local_tx {
            // A consumer that went away is not an emitter error.
            let _ = tx.send(enveloped.clone()).await;
        }

        if let Some(sink) = &self.sink {
            match enveloped.to_value() {
                Ok(value) => {
                    if let Err(e) = sink.broadcast(&self.room(), value).await {
                        warn!(room = %self.room(), error = %e, "event broadcast failed");
                    }
                }
                Err(e) => warn!(error = %e, "event serialization failed"),
            }
        }

        enveloped
    }

    pub async fn emit_reasoning(&self, step: impl Into<String>, content: impl Into<String>) {
        self.emit(AgentEvent::Reasoning {
            step: step.into(),
            content: content.into(),
            confidence: 1.0,
            reasoning_chain: Vec::new(),
        })
        .await;
    }

    pub async fn emit_plan(&self, plan: &ToolPlan) {
        let strategy = if plan.parallel_groups.len() <= 1 {
            "parallel"
        } else {
            "layered"
        };
        self.emit(AgentEvent::Plan {
            steps: plan.tools.clone(),
            parallel_groups: plan.parallel_groups.clone(),
            strategy: strategy.to_string(),
            reasoning: plan.reasoning.clone(),
        })
        .await;
    }

    pub async fn emit_tool_start(&self, tool_name: &str, args: Value) {
        self.emit(AgentEvent::ToolExecution {
            tool_name: tool_name.to_string(),
            status: ToolStatus::Started,
            args,
            result: None,
            progress_percent: None,
            duration_ms: None,
            error: None,
        })
        .await;
    }

    pub async fn emit_tool_progress(&self, tool_name: &str, progress_percent: u8) {
        self.emit(AgentEvent::ToolExecution {
            tool_name: tool_name.to_string(),
            status: ToolStatus::InProgress,
            args: Value::Object(serde_json::Map::new()),
            result: None,
            progress_percent: Some(progress_percent.min(100)),
            duration_ms: None,
            error: None,
        })
        .await;
    }

    pub async fn emit_tool_complete(&self, tool_name: &str, result: Value, duration_ms: u64) {
        self.emit(AgentEvent::ToolExecution {
            tool_name: tool_name.to_string(),
            status: ToolStatus::Completed,
            args: Value::Object(serde_json::Map::new()),
            result: Some(result),
            progress_percent: Some(100),
            duration_ms: Some(duration_ms),
            error: None,
        })
        .await;
    }

    pub async fn emit_tool_error(&self, tool_name: &str, error: impl Into<String>) {
        self.emit(AgentEvent::ToolExecution {
            tool_name: tool_name.to_string(),
            status: ToolStatus::Failed,
            args: Value::Object(serde_json::Map::new()),
            result: None,
            progress_percent: None,
            duration_ms: None,
            error: Some(error.into()),
        })
        .await;
    }

    /// Emits overall progress; `eta_ms` is average-per-step × remaining,
    /// absent until the first step lands.
    pub async fn emit_progress(
        &self,
        current_step: usize,
        total_steps: usize,
        current_action: impl Into<String>,
    ) {
        let percent_complete = if total_steps > 0 {
            ((current_step * 100) / total_steps).min(100) as u8
        } else {
            0
        };
        let eta_ms = if current_step > 0 {
            let elapsed = self.started_at.elapsed().as_millis() as u64;
            let avg_per_step = elapsed / current_step as u64;
            Some(avg_per_step * total_steps.saturating_sub(current_step) as u64)
        } else {
            None
        };
        self.emit(AgentEvent::Progress {
            current_step,
            total_steps,
            percent_complete,
            current_action: current_action.into(),
            eta_ms,
        })
        .await;
    }

    pub async fn emit_status(
        &self,
        status: AgentPhase,
        tools: Vec<String>,
        message: Option<String>,
    ) {
        self.emit(AgentEvent::AgentStatus {
            status,
            tools,
            message,
        })
        .await;
    }

    pub async fn emit_message(
        &self,
        content: impl Into<String>,
        tools_used: Vec<String>,
        timing: Timing,
        context_usage: Option<Value>,
    ) {
        self.emit(AgentEvent::Message {
            content: content.into(),
            tools_used,
            timing: Some(timing),
            context_usage,
        })
        .await;
    }

    pub async fn emit_error(
        &self,
        error_type: impl Into<String>,
        message: impl Into<String>,
        recoverable: bool,
        recovery_action: Option<String>,
    ) {
        self.emit(AgentEvent::Error {
            error_type: error_type.into(),
            message: message.into(),
            recoverable,
            recovery_action,
        })
        .await;
    }

    /// All events emitted so far, in order (replay).
    pub fn history(&self) -> Vec<SessionEvent> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear_history(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn session_duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}
