//! Decision memory: loop prevention and the failure circuit breaker.
//!
//! Tracks questions asked, tools executed, and actions taken within one
//! conversation to stop three failure modes: asking the same question
//! twice, re-running a tool with identical arguments past its budget, and
//! oscillating between two decisions (AB/AB). Repeated failures trip a
//! circuit breaker; while it is open every duplicate check answers "yes"
//! and the agent exits early.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::embedding::{cosine_similarity, Embedder};

/// What kind of decision was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Question,
    ToolExecution,
    Action,
}

/// One recorded decision.
#[derive(Clone, Debug)]
pub struct Decision {
    pub kind: DecisionKind,
    /// The question text, tool name, or action description.
    pub content: String,
    /// Canonicalized arguments or free-form context at decision time.
    pub context: String,
    pub recorded_at: SystemTime,
    /// Monotonic order across all decision kinds (wall clocks can tie).
    pub seq: u64,
    pub result: Option<Value>,
}

impl Decision {
    /// A result counts as failed when absent or when it is an object
    /// carrying an `error` field.
    fn failed(&self) -> bool {
        match &self.result {
            None => true,
            Some(value) => value
                .as_object()
                .map(|obj| obj.contains_key("error"))
                .unwrap_or(false),
        }
    }

    fn signature(&self) -> String {
        let kind = match self.kind {
            DecisionKind::Question => "question",
            DecisionKind::ToolExecution => "tool_execution",
            DecisionKind::Action => "action",
        };
        format!("{}:{}:{}", kind, self.content, self.context)
    }
}

/// Tuning for duplicate budgets and the circuit breaker.
#[derive(Clone, Debug)]
pub struct DecisionMemoryConfig {
    /// Exact repeats of one question before `has_asked` trips.
    pub max_same_question: usize,
    /// Repeats of one `(tool, args)` pair before `has_executed_tool` trips.
    pub max_same_tool: usize,
    /// Failed results before the circuit opens.
    pub max_failed_attempts: u32,
    /// Embedding similarity at which two questions count as the same.
    pub similarity_threshold: f32,
    /// Decisions inspected by `is_looping`.
    pub loop_window: usize,
}

impl Default for DecisionMemoryConfig {
    fn default() -> Self {
        Self {
            max_same_question: 1,
            max_same_tool: 2,
            max_failed_attempts: 3,
            similarity_threshold: 0.85,
            loop_window: 5,
        }
    }
}

/// Counters exposed by [`DecisionMemory::stats`].
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct DecisionMemoryStats {
    pub questions_asked: usize,
    pub tools_executed: usize,
    pub actions_taken: usize,
    pub failed_attempts: u32,
    pub circuit_open: bool,
    pub loops_prevented: u64,
}

#[derive(Default)]
struct Inner {
    questions: Vec<Decision>,
    tools: Vec<Decision>,
    actions: Vec<Decision>,
    failed_attempts: u32,
    circuit_open: bool,
}

/// Per-conversation decision tracker.
pub struct DecisionMemory {
    config: DecisionMemoryConfig,
    embedder: Option<Arc<dyn Embedder>>,
    inner: Mutex<Inner>,
    seq: AtomicU64,
    loops_prevented: AtomicU64,
}

impl DecisionMemory {
    pub fn new() -> Self {
        Self::with_config(DecisionMemoryConfig::default())
    }

    pub fn with_config(config: DecisionMemoryConfig) -> Self {
        Self {
            config,
            embedder: None,
            inner: Mutex::new(Inner::default()),
            seq: AtomicU64::new(0),
            loops_prevented: AtomicU64::new(0),
        }
    }

    /// Enables semantic duplicate detection. Without an embedder, checks
    /// fall back to exact matching.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Sorted `key=value` canonicalization; stable and order-independent
    /// for short arg sets.
    pub fn canonicalize_args(args: &Value) -> String {
        match args.as_object() {
            Some(map) => {
                let mut pairs: Vec<String> =
                    map.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                pairs.sort();
                pairs.join(",")
            }
            None if args.is_null() => String::new(),
            None => args.to_string(),
        }
    }

    fn make_decision(
        &self,
        kind: DecisionKind,
        content: String,
        context: String,
        result: Option<Value>,
    ) -> Decision {
        Decision {
            kind,
            content,
            context,
            recorded_at: SystemTime::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            result,
        }
    }

    /// Feeds the circuit breaker: failures count up, successes count down
    /// (floor 0) and close an open circuit.
    fn track_result(&self, inner: &mut Inner, failed: bool) {
        if failed {
            inner.failed_attempts += 1;
            if inner.failed_attempts >= self.config.max_failed_attempts && !inner.circuit_open {
                inner.circuit_open = true;
                warn!(
                    failed_attempts = inner.failed_attempts,
                    "circuit breaker opened"
                );
            }
        } else {
            inner.failed_attempts = inner.failed_attempts.saturating_sub(1);
            if inner.circuit_open {
                inner.circuit_open = false;
                info!("circuit breaker closed after successful operation");
            }
        }
    }

    /// True when this question (or a semantically similar one) was already
    /// asked at least `max_same_question` times. Unconditionally true while
    /// the circuit is open.
    pub async fn has_asked(&self, question: &str) -> bool {
        let candidates: Vec<String> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.circuit_open {
                return true;
            }
            let needle = question.trim().to_lowercase();
            let exact = inner
                .questions
                .iter()
                .filter(|d| d.content.trim().to_lowercase() == needle)
                .count();
            if exact >= self.config.max_same_question {
                self.loops_prevented.fetch_add(1, Ordering::Relaxed);
                warn!(question = %question, repeats = exact, "duplicate question prevented");
                return true;
            }
            inner.questions.iter().map(|d| d.content.clone()).collect()
        };

        // Semantic pass runs outside the lock; it suspends on the embedder.
        let Some(embedder) = &self.embedder else {
            return false;
        };
        if candidates.is_empty() {
            return false;
        }

        let mut texts: Vec<&str> = vec![question];
        texts.extend(candidates.iter().map(String::as_str));
        let vectors = match embedder.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(error = %e, "similarity check failed, falling back to exact match");
                return false;
            }
        };
        let (query_vec, rest) = match vectors.split_first() {
            Some(split) => split,
            None => return false,
        };
        for (candidate, vector) in candidates.iter().zip(rest) {
            let similarity = cosine_similarity(query_vec, vector);
            if similarity >= self.config.similarity_threshold {
                self.loops_prevented.fetch_add(1, Ordering::Relaxed);
                warn!(
                    question = %question,
                    matched = %candidate,
                    similarity,
                    "similar question prevented"
                );
                return true;
            }
        }
        false
    }

    pub fn record_question(&self, question: &str, result: Option<Value>) {
        let decision = self.make_decision(
            DecisionKind::Question,
            question.to_string(),
            String::new(),
            result,
        );
        let failed = decision.failed();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.questions.push(decision);
        self.track_result(&mut inner, failed);
    }

    /// True when `(tool, args)` was already executed `max_same_tool` times.
    /// Unconditionally true while the circuit is open.
    pub fn has_executed_tool(&self, tool_name: &str, args: &Value) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.circuit_open {
            return true;
        }
        let canonical = Self::canonicalize_args(args);
        let executions = inner
            .tools
            .iter()
            .filter(|d| d.content == tool_name && d.context == canonical)
            .count();
        if executions >= self.config.max_same_tool {
            self.loops_prevented.fetch_add(1, Ordering::Relaxed);
            warn!(
                tool = %tool_name,
                args = %canonical,
                repeats = executions,
                "repeated tool execution prevented"
            );
            return true;
        }
        false
    }

    pub fn record_tool_execution(&self, tool_name: &str, args: &Value, result: Option<Value>) {
        let decision = self.make_decision(
            DecisionKind::ToolExecution,
            tool_name.to_string(),
            Self::canonicalize_args(args),
            result,
        );
        let failed = decision.failed();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tools.push(decision);
        self.track_result(&mut inner, failed);
    }

    pub fn record_action(&self, action: &str, context: &str, result: Option<Value>) {
        let decision = self.make_decision(
            DecisionKind::Action,
            action.to_string(),
            context.to_string(),
            result,
        );
        let failed = decision.failed();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.actions.push(decision);
        self.track_result(&mut inner, failed);
    }

    /// Loop check over the configured window.
    pub fn is_looping(&self) -> bool {
        self.is_looping_within(self.config.loop_window)
    }

    /// Inspects the last `window` decisions (all kinds interleaved in
    /// recording order): AA repetition or AB/AB alternation counts as a
    /// loop and bumps `loops_prevented`.
    pub fn is_looping_within(&self, window: usize) -> bool {
        let recent: Vec<String> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut all: Vec<&Decision> = inner
                .questions
                .iter()
                .chain(inner.tools.iter())
                .chain(inner.actions.iter())
                .collect();
            all.sort_by_key(|d| d.seq);
            all.iter()
                .rev()
                .take(window)
                .rev()
                .map(|d| d.signature())
                .collect()
        };

        if recent.len() < 4 {
            return false;
        }

        let n = recent.len();
        // Last two repeated the two before (covers AA-AA and AB-AB).
        if recent[n - 2..] == recent[n - 4..n - 2] {
            self.loops_prevented.fetch_add(1, Ordering::Relaxed);
            warn!(pattern = ?&recent[n - 2..], "decision loop detected");
            return true;
        }
        // Alternating A B A B.
        if recent[n - 1] == recent[n - 3] && recent[n - 2] == recent[n - 4] {
            self.loops_prevented.fetch_add(1, Ordering::Relaxed);
            warn!(pattern = ?&recent[n - 4..], "alternating decision loop detected");
            return true;
        }
        false
    }

    /// True while the circuit breaker is open.
    pub fn should_early_exit(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .circuit_open
    }

    pub fn reset_circuit_breaker(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.circuit_open = false;
        inner.failed_attempts = 0;
        info!("circuit breaker reset");
    }

    /// Recent decisions across all kinds, most recent first.
    pub fn recent_decisions(&self, count: usize) -> Vec<Decision> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Decision> = inner
            .questions
            .iter()
            .chain(inner.tools.iter())
            .chain(inner.actions.iter())
            .cloned()
            .collect();
        all.sort_by_key(|d| std::cmp::Reverse(d.seq));
        all.truncate(count);
        all
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.questions.clear();
        inner.tools.clear();
        inner.actions.clear();
        inner.failed_attempts = 0;
        inner.circuit_open = false;
        self.loops_prevented.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> DecisionMemoryStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        DecisionMemoryStats {
            questions_asked: inner.questions.len(),
            tools_executed: inner.tools.len(),
            actions_taken: inner.actions.len(),
            failed_attempts: inner.failed_attempts,
            circuit_open: inner.circuit_open,
            loops_prevented: self.loops_prevented.load(Ordering::Relaxed),
        }
    }
}

impl Default for DecisionMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;

    /// **Scenario**: record then check. The default budget of one means a
    /// single record already trips the duplicate check.
    #[tokio::test]
    async fn recorded_question_trips_has_asked() {
        let memory = DecisionMemory::new();
        assert!(!memory.has_asked("Did I check the calendar?").await);
        memory.record_question("Did I check the calendar?", Some(serde_json::json!("yes")));
        assert!(memory.has_asked("Did I check the calendar?").await);
        // Case-insensitive exact match.
        assert!(memory.has_asked("did i check the calendar?").await);
    }

    /// **Scenario S7**: a semantically similar question trips the check
    /// when embeddings are available.
    #[tokio::test]
    async fn similar_question_trips_semantic_check() {
        let embedder = MockEmbedder::new(4)
            .with_vector("Did I check the calendar?", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("Have I looked at the calendar?", vec![0.97, 0.24, 0.0, 0.0]);
        let memory = DecisionMemory::new().with_embedder(Arc::new(embedder));

        memory.record_question("Did I check the calendar?", Some(serde_json::json!("yes")));
        memory.record_question("Did I check the calendar?", Some(serde_json::json!("yes")));
        assert!(memory.has_asked("Have I looked at the calendar?").await);
        assert!(memory.stats().loops_prevented >= 1);
    }

    #[tokio::test]
    async fn tool_budget_allows_two_runs_then_trips() {
        let memory = DecisionMemory::new();
        let args = serde_json::json!({"query": "john"});
        assert!(!memory.has_executed_tool("search_emails", &args));
        memory.record_tool_execution("search_emails", &args, Some(serde_json::json!([])));
        assert!(!memory.has_executed_tool("search_emails", &args));
        memory.record_tool_execution("search_emails", &args, Some(serde_json::json!([])));
        assert!(memory.has_executed_tool("search_emails", &args));

        // Different args are a different budget.
        assert!(!memory.has_executed_tool("search_emails", &serde_json::json!({"query": "jane"})));
    }

    #[test]
    fn canonicalize_args_sorts_pairs() {
        let a = serde_json::json!({"b": 2, "a": 1});
        let b = serde_json::json!({"a": 1, "b": 2});
        assert_eq!(
            DecisionMemory::canonicalize_args(&a),
            DecisionMemory::canonicalize_args(&b)
        );
        assert_eq!(DecisionMemory::canonicalize_args(&Value::Null), "");
    }

    /// **Scenario**: three failed results open the circuit; every check then
    /// answers true and `should_early_exit` is set.
    #[tokio::test]
    async fn repeated_failures_open_the_circuit() {
        let memory = DecisionMemory::new();
        for _ in 0..3 {
            memory.record_tool_execution(
                "search_emails",
                &serde_json::json!({}),
                Some(serde_json::json!({"error": "upstream 500"})),
            );
        }
        assert!(memory.should_early_exit());
        assert!(memory.has_asked("a brand new question").await);
        assert!(memory.has_executed_tool("never_run", &serde_json::json!({})));

        memory.reset_circuit_breaker();
        assert!(!memory.should_early_exit());
    }

    /// **Scenario**: the circuit auto-closes on the next successful
    /// operation.
    #[test]
    fn success_closes_an_open_circuit() {
        let memory = DecisionMemory::new();
        for _ in 0..3 {
            memory.record_question("q", None);
        }
        assert!(memory.should_early_exit());
        memory.record_question("other", Some(serde_json::json!("answered")));
        assert!(!memory.should_early_exit());
    }

    #[test]
    fn ab_ab_pattern_is_detected_as_loop() {
        let memory = DecisionMemory::new();
        let args = serde_json::json!({});
        for _ in 0..2 {
            memory.record_tool_execution("a", &args, Some(serde_json::json!("ok")));
            memory.record_tool_execution("b", &args, Some(serde_json::json!("ok")));
        }
        assert!(memory.is_looping());
        assert!(memory.stats().loops_prevented >= 1);
    }

    #[test]
    fn distinct_recent_decisions_are_not_a_loop() {
        let memory = DecisionMemory::new();
        let args = serde_json::json!({});
        for name in ["a", "b", "c", "d"] {
            memory.record_tool_execution(name, &args, Some(serde_json::json!("ok")));
        }
        assert!(!memory.is_looping());
    }

    #[test]
    fn clear_resets_everything() {
        let memory = DecisionMemory::new();
        memory.record_question("q", None);
        memory.record_tool_execution("t", &serde_json::json!({}), None);
        memory.clear();
        let stats = memory.stats();
        assert_eq!(stats.questions_asked, 0);
        assert_eq!(stats.tools_executed, 0);
        assert_eq!(stats.failed_attempts, 0);
        assert!(!stats.circuit_open);
    }

    #[test]
    fn recent_decisions_interleave_by_recording_order() {
        let memory = DecisionMemory::new();
        memory.record_question("q1", Some(serde_json::json!("ok")));
        memory.record_tool_execution("t1", &serde_json::json!({}), Some(serde_json::json!("ok")));
        memory.record_action("a1", "ctx", Some(serde_json::json!("ok")));

        let recent = memory.recent_decisions(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, DecisionKind::Action);
        assert_eq!(recent[1].kind, DecisionKind::ToolExecution);
    }
}
