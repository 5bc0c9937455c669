//! Event taxonomy: type + payload for each progress event an agent can emit.
//! Discriminated by `type` in the serialized form; envelope fields
//! (event_id, timestamp, session_id, agent_id) are applied separately.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-step tool execution status carried by `AgentEvent::ToolExecution`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

/// Agent lifecycle phase carried by `AgentEvent::AgentStatus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Initializing,
    Executing,
    Completed,
    CompletedWithErrors,
}

/// Phase timings for one request, in milliseconds. Attached to the final
/// `message` event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub total_ms: u64,
    pub plan_ms: u64,
    pub execution_ms: u64,
    pub synthesis_ms: u64,
}

/// One progress event: wire shape is `{ "type": ..., ...payload }`.
///
/// Events from a single session preserve emission order; cross-session order
/// is undefined. The final assistant response is always a `Message` event;
/// a request that fails as a whole emits `Error` and no `Message`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Free-form step commentary.
    Reasoning {
        step: String,
        content: String,
        #[serde(default = "default_confidence")]
        confidence: f32,
        #[serde(default)]
        reasoning_chain: Vec<String>,
    },
    /// Emitted once per request, after planning.
    Plan {
        steps: Vec<String>,
        parallel_groups: Vec<Vec<String>>,
        strategy: String,
        reasoning: String,
    },
    /// Per-step execution progress: started → optional in_progress → completed | failed.
    ToolExecution {
        tool_name: String,
        status: ToolStatus,
        #[serde(default)]
        args: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress_percent: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Overall progress across the step set; `eta_ms` is avg-per-step × remaining.
    Progress {
        current_step: usize,
        total_steps: usize,
        percent_complete: u8,
        current_action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_ms: Option<u64>,
    },
    /// Lifecycle transition.
    AgentStatus {
        status: AgentPhase,
        #[serde(default)]
        tools: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Data retrieved, with a small preview.
    Data {
        data_type: String,
        count: usize,
        #[serde(default)]
        preview: Vec<Value>,
    },
    /// Key discovery worth surfacing to the user.
    Insight {
        content: String,
        source: String,
        importance: String,
    },
    /// A decision point the agent resolved.
    Decision {
        question: String,
        choice: String,
        reasoning: String,
        #[serde(default)]
        alternatives: Vec<String>,
        #[serde(default = "default_confidence")]
        confidence: f32,
    },
    /// Internal commentary, visible to the user when the host chooses.
    Thought {
        content: String,
        thought_type: String,
    },
    /// Pending action proposals that need user approval before execution.
    ApprovalRequired {
        proposals: Vec<Value>,
        risk_level: String,
    },
    /// The final assistant response for the request.
    Message {
        content: String,
        #[serde(default)]
        tools_used: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timing: Option<Timing>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context_usage: Option<Value>,
    },
    /// Recoverable or unrecoverable failure.
    Error {
        error_type: String,
        message: String,
        recoverable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        recovery_action: Option<String>,
    },
}

fn default_confidence() -> f32 {
    1.0
}

impl AgentEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The `type` discriminant of this event in its serialized form.
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::Reasoning { .. } => "reasoning",
            AgentEvent::Plan { .. } => "plan",
            AgentEvent::ToolExecution { .. } => "tool_execution",
            AgentEvent::Progress { .. } => "progress",
            AgentEvent::AgentStatus { .. } => "agent_status",
            AgentEvent::Data { .. } => "data",
            AgentEvent::Insight { .. } => "insight",
            AgentEvent::Decision { .. } => "decision",
            AgentEvent::Thought { .. } => "thought",
            AgentEvent::ApprovalRequired { .. } => "approval_required",
            AgentEvent::Message { .. } => "message",
            AgentEvent::Error { .. } => "error",
        }
    }
}
