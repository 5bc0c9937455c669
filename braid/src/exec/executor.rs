//! Parallel, dependency-aware runner for execution steps.
//!
//! Single scheduler loop, many workers: each iteration collects the ready
//! set (dependencies satisfied), launches up to `max_parallel` steps by
//! descending priority, and folds the batch's outcomes back in. Failure of
//! one step never cancels independent steps; only dependents cascade to
//! `Skipped`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use agent_event::AgentPhase;

use crate::plan::ToolPlan;
use crate::stream::StreamingSession;
use crate::tools::ToolRegistry;

use super::{ExecutionResult, ExecutionStep, StepDetail, StepStatus};

const UNMET_DEPENDENCIES: &str = "Unmet dependencies or dependency failure";
const CANCELLED: &str = "Request cancelled";

/// Dependency-aware parallel executor.
#[derive(Clone)]
pub struct DagExecutor {
    max_parallel: usize,
    retry_delay: Duration,
    session: Option<Arc<StreamingSession>>,
}

impl Default for DagExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DagExecutor {
    pub fn new() -> Self {
        Self {
            max_parallel: 10,
            retry_delay: Duration::from_secs(1),
            session: None,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Base delay for exponential backoff between retries.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Attaches a streaming session for progress events.
    pub fn with_session(mut self, session: Arc<StreamingSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Runs a step set to completion (or deadlock/cancellation).
    pub async fn execute_plan(
        &self,
        steps: Vec<ExecutionStep>,
        emit_progress: bool,
    ) -> ExecutionResult {
        self.execute_plan_with_cancellation(steps, emit_progress, CancellationToken::new())
            .await
    }

    /// Runs a step set under a cancellation token. Cancellation aborts
    /// in-flight steps at their next suspension point (tool await or backoff
    /// sleep) and skips everything not yet launched.
    pub async fn execute_plan_with_cancellation(
        &self,
        steps: Vec<ExecutionStep>,
        emit_progress: bool,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let start = Instant::now();
        let total_steps = steps.len();

        let mut step_map: HashMap<String, ExecutionStep> = steps
            .into_iter()
            .map(|step| (step.tool_name.clone(), step))
            .collect();
        let mut completed: HashSet<String> = HashSet::new();
        let mut results: HashMap<String, Value> = HashMap::new();
        let mut errors: HashMap<String, String> = HashMap::new();

        if emit_progress {
            if let Some(session) = &self.session {
                let mut tools: Vec<String> = step_map.keys().cloned().collect();
                tools.sort();
                session
                    .emit_status(
                        AgentPhase::Executing,
                        tools,
                        Some(format!("Executing {} tools", total_steps)),
                    )
                    .await;
            }
        }

        let mut current_step = 0usize;

        while completed.len() < total_steps {
            if cancel.is_cancelled() {
                Self::skip_remaining(&mut step_map, &mut errors, CANCELLED);
                break;
            }

            // Ready set: Pending/Ready steps whose dependencies are all
            // completed. Ready (not launched last round due to the
            // parallelism cap) stays eligible.
            let mut ready_names: Vec<String> = Vec::new();
            for step in step_map.values_mut() {
                if matches!(step.status, StepStatus::Pending | StepStatus::Ready)
                    && step.is_ready(&completed)
                {
                    step.status = StepStatus::Ready;
                    ready_names.push(step.tool_name.clone());
                }
            }

            if ready_names.is_empty() {
                // Remaining steps can never run: dependency deadlock caused
                // by failures or tools missing from the registry.
                Self::skip_remaining(&mut step_map, &mut errors, UNMET_DEPENDENCIES);
                break;
            }

            ready_names.sort_by_key(|name| {
                std::cmp::Reverse(step_map.get(name).map(|s| s.priority).unwrap_or(0))
            });
            ready_names.truncate(self.max_parallel);

            if emit_progress {
                if let Some(session) = &self.session {
                    let action = format!(
                        "Running {} tools in parallel: {}",
                        ready_names.len(),
                        ready_names.join(", ")
                    );
                    session
                        .emit_progress(current_step, total_steps, action)
                        .await;
                }
            }

            let mut batch = Vec::with_capacity(ready_names.len());
            let mut batch_names = Vec::with_capacity(ready_names.len());
            for name in ready_names {
                let step = match step_map.remove(&name) {
                    Some(step) => step,
                    None => continue,
                };
                batch_names.push(name);
                let retry_delay = self.retry_delay;
                let session = if emit_progress {
                    self.session.clone()
                } else {
                    None
                };
                let cancel = cancel.clone();
                batch.push(tokio::spawn(async move {
                    run_step_with_retry(step, retry_delay, session, cancel).await
                }));
            }

            for (name, joined) in batch_names.into_iter().zip(join_all(batch).await) {
                current_step += 1;
                match joined {
                    Ok(step) => {
                        if step.status == StepStatus::Completed {
                            completed.insert(step.tool_name.clone());
                            if let Some(result) = &step.result {
                                results.insert(step.tool_name.clone(), result.clone());
                            }
                        } else {
                            errors.insert(
                                step.tool_name.clone(),
                                step.error.clone().unwrap_or_else(|| "Unknown error".into()),
                            );
                        }
                        step_map.insert(step.tool_name.clone(), step);
                    }
                    Err(join_err) => {
                        // Worker panicked; the step itself is gone, so record
                        // the failure by name.
                        error!(tool = %name, error = %join_err, "step worker panicked");
                        errors.insert(name, format!("worker panicked: {}", join_err));
                    }
                }
            }
        }

        let total_duration = start.elapsed();
        let mut step_details: HashMap<String, StepDetail> = step_map
            .values()
            .map(|step| {
                (
                    step.tool_name.clone(),
                    StepDetail {
                        status: step.status,
                        duration_ms: step.duration().map(|d| d.as_millis() as u64),
                        attempts: step.attempts,
                        error: step.error.clone(),
                    },
                )
            })
            .collect();
        for name in errors.keys() {
            step_details.entry(name.clone()).or_insert(StepDetail {
                status: StepStatus::Failed,
                duration_ms: None,
                attempts: 0,
                error: errors.get(name).cloned(),
            });
        }

        let success = errors.is_empty();

        if emit_progress {
            if let Some(session) = &self.session {
                let phase = if success {
                    AgentPhase::Completed
                } else {
                    AgentPhase::CompletedWithErrors
                };
                let mut message = format!("Executed {} tools successfully", results.len());
                if !errors.is_empty() {
                    message.push_str(&format!(", {} failed", errors.len()));
                }
                session.emit_status(phase, Vec::new(), Some(message)).await;
            }
        }

        ExecutionResult {
            success,
            results,
            errors,
            total_duration,
            step_details,
        }
    }

    fn skip_remaining(
        step_map: &mut HashMap<String, ExecutionStep>,
        errors: &mut HashMap<String, String>,
        reason: &str,
    ) {
        for step in step_map.values_mut() {
            if matches!(step.status, StepStatus::Pending | StepStatus::Ready) {
                step.status = StepStatus::Skipped;
                step.error = Some(reason.to_string());
                errors.insert(step.tool_name.clone(), reason.to_string());
            }
        }
    }

    /// Converts a plan into steps: each tool in parallel group *k* depends
    /// on the union of groups *0..k* and gets priority `10 − k`.
    ///
    /// Tools missing from the registry are dropped with a warning; their
    /// dependents deadlock and end up `Skipped`.
    pub fn from_tool_plan(
        plan: &ToolPlan,
        registry: &ToolRegistry,
        tool_args: Option<&HashMap<String, Value>>,
    ) -> Vec<ExecutionStep> {
        let mut steps = Vec::new();
        let mut previous_group_tools: Vec<String> = Vec::new();

        for (group_idx, group) in plan.parallel_groups.iter().enumerate() {
            for tool_name in group {
                let Some(tool) = registry.get(tool_name) else {
                    warn!(tool = %tool_name, "tool not in registry, dropping from plan");
                    continue;
                };
                let args = tool_args
                    .and_then(|m| m.get(tool_name).cloned())
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                steps.push(
                    ExecutionStep::new(tool_name.clone(), tool)
                        .with_args(args)
                        .with_dependencies(previous_group_tools.clone())
                        .with_priority(10u8.saturating_sub(group_idx as u8).max(1)),
                );
            }
            previous_group_tools.extend(group.iter().cloned());
        }

        steps
    }

    /// Builds a dependency-free step set: every tool runs in parallel.
    pub fn simple_parallel(
        tool_names: &[String],
        registry: &ToolRegistry,
        tool_args: Option<&HashMap<String, Value>>,
    ) -> Vec<ExecutionStep> {
        tool_names
            .iter()
            .filter_map(|tool_name| {
                let Some(tool) = registry.get(tool_name) else {
                    warn!(tool = %tool_name, "tool not in registry, dropping");
                    return None;
                };
                let args = tool_args
                    .and_then(|m| m.get(tool_name).cloned())
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                Some(ExecutionStep::new(tool_name.clone(), tool).with_args(args))
            })
            .collect()
    }
}

/// Runs one step: timeout per attempt, exponential backoff between
/// attempts, cancellation observed at the tool await and during backoff.
async fn run_step_with_retry(
    mut step: ExecutionStep,
    retry_delay: Duration,
    session: Option<Arc<StreamingSession>>,
    cancel: CancellationToken,
) -> ExecutionStep {
    step.status = StepStatus::Running;
    step.started_at = Some(Instant::now());

    if let Some(session) = &session {
        session.emit_tool_start(&step.tool_name, step.args.clone()).await;
    }

    let mut last_error = String::new();

    for attempt in 0..=step.retry_count {
        step.attempts = attempt + 1;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                last_error = CANCELLED.to_string();
                break;
            }
            timed = tokio::time::timeout(step.timeout, step.tool.invoke(step.args.clone())) => timed,
        };

        match outcome {
            Ok(Ok(result)) => {
                step.status = StepStatus::Completed;
                step.result = Some(result.clone());
                step.finished_at = Some(Instant::now());
                if let Some(session) = &session {
                    let duration_ms = step.duration().map(|d| d.as_millis() as u64).unwrap_or(0);
                    session
                        .emit_tool_complete(&step.tool_name, result, duration_ms)
                        .await;
                }
                return step;
            }
            Ok(Err(e)) => {
                last_error = e.to_string();
                warn!(
                    tool = %step.tool_name,
                    attempt = attempt + 1,
                    error = %last_error,
                    "tool attempt failed"
                );
            }
            Err(_elapsed) => {
                last_error = format!("Timeout after {}ms", step.timeout.as_millis());
                warn!(
                    tool = %step.tool_name,
                    attempt = attempt + 1,
                    timeout_ms = step.timeout.as_millis() as u64,
                    "tool attempt timed out"
                );
            }
        }

        if attempt < step.retry_count {
            let backoff = retry_delay.saturating_mul(2u32.saturating_pow(attempt));
            tokio::select! {
                _ = cancel.cancelled() => {
                    last_error = CANCELLED.to_string();
                    break;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    step.status = StepStatus::Failed;
    step.error = Some(last_error.clone());
    step.finished_at = Some(Instant::now());
    if let Some(session) = &session {
        session.emit_tool_error(&step.tool_name, last_error).await;
    }
    step
}
