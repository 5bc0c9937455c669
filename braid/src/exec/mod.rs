//! Dependency-aware parallel execution of tool plans.
//!
//! [`ExecutionStep`] is one scheduled tool call with runtime state;
//! [`DagExecutor`] runs a step set with parallelism, retries, timeouts, and
//! dependency ordering, emitting progress events along the way.

mod executor;

pub use executor::DagExecutor;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::Tool;

/// Execution status of a single step.
///
/// Transitions are monotonic: `Pending → Ready → Running → {Completed |
/// Failed}`. `Skipped` is terminal and set when a dependency ends in
/// `Failed` or `Skipped` (or the request is cancelled before the step ran).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One scheduled tool call in the DAG.
pub struct ExecutionStep {
    pub tool_name: String,
    /// Normalized handle resolved from the registry at conversion time.
    pub tool: Arc<dyn Tool>,
    pub args: Value,
    /// Names of tools that must complete before this step runs.
    pub dependencies: Vec<String>,
    /// Higher priority steps launch first when more are ready than
    /// `max_parallel` allows (1–10).
    pub priority: u8,
    /// Retry attempts after the first failure.
    pub retry_count: u32,
    pub timeout: Duration,

    // Runtime state.
    pub status: StepStatus,
    pub attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl ExecutionStep {
    pub fn new(tool_name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool,
            args: Value::Object(serde_json::Map::new()),
            dependencies: Vec::new(),
            priority: 5,
            retry_count: 2,
            timeout: Duration::from_secs(30),
            status: StepStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True when every dependency is in `completed`.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }

    /// Wall-clock execution time, once finished.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }
}

/// Per-step summary carried in [`ExecutionResult::step_details`].
#[derive(Clone, Debug, Serialize)]
pub struct StepDetail {
    pub status: StepStatus,
    pub duration_ms: Option<u64>,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Final artifact of an executor run.
///
/// Completeness invariant: every step lands in exactly one of `results`
/// (completed) or `errors` (failed, skipped), so
/// `results.len() + errors.len() == steps.len()`.
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    /// True iff no step ended in `Failed` or `Skipped`.
    pub success: bool,
    pub results: HashMap<String, Value>,
    pub errors: HashMap<String, String>,
    pub total_duration: Duration,
    pub step_details: HashMap<String, StepDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FnTool;

    fn noop_tool(name: &str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(name, |_| async { Ok(Value::Null) }))
    }

    #[test]
    fn step_defaults_match_contract() {
        let step = ExecutionStep::new("t", noop_tool("t"));
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.priority, 5);
        assert_eq!(step.retry_count, 2);
        assert_eq!(step.timeout, Duration::from_secs(30));
        assert_eq!(step.attempts, 0);
        assert!(step.duration().is_none());
    }

    #[test]
    fn priority_is_clamped_to_range() {
        let step = ExecutionStep::new("t", noop_tool("t")).with_priority(99);
        assert_eq!(step.priority, 10);
        let step = ExecutionStep::new("t", noop_tool("t")).with_priority(0);
        assert_eq!(step.priority, 1);
    }

    #[test]
    fn readiness_follows_completed_set() {
        let step = ExecutionStep::new("c", noop_tool("c")).with_dependencies(["a", "b"]);
        let mut completed = HashSet::new();
        completed.insert("a".to_string());
        assert!(!step.is_ready(&completed));
        completed.insert("b".to_string());
        assert!(step.is_ready(&completed));
    }

    #[test]
    fn step_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(StepStatus::Skipped).unwrap(),
            serde_json::json!("skipped")
        );
    }
}
