//! Per-session conversation buffer with token accounting and automatic
//! compaction.
//!
//! The contract is "never exceed the token budget for long": every append
//! counts the new message's tokens, and once the running total crosses the
//! compaction trigger (80% of the budget by default) everything but the
//! most recent messages is replaced in place by a single summary message.
//! The recent tail is always preserved verbatim.

mod compactor;

pub use compactor::SmartCompactor;

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

/// Message role within a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation message. Immutable once appended.
#[derive(Clone, Debug)]
pub struct MessageEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: SystemTime,
    pub tokens: usize,
    pub metadata: Value,
}

impl MessageEntry {
    pub fn new(role: Role, content: String, tokens: usize) -> Self {
        Self {
            role,
            content,
            timestamp: SystemTime::now(),
            tokens,
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// True for the synthetic summary message produced by compaction.
    pub fn is_summary(&self) -> bool {
        self.metadata
            .get("is_summary")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Canonical `{role, content}` form handed to the language model.
#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// State for one conversation session.
#[derive(Debug)]
pub struct ConversationSession {
    pub session_id: String,
    pub messages: Vec<MessageEntry>,
    pub total_tokens: usize,
    pub compaction_count: u32,
    pub created_at: SystemTime,
    pub last_compacted_at: Option<SystemTime>,
}

impl ConversationSession {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            messages: Vec::new(),
            total_tokens: 0,
            compaction_count: 0,
            created_at: SystemTime::now(),
            last_compacted_at: None,
        }
    }
}

/// Token counting seam. The tokenizer is an external collaborator; the
/// invariants hold for any implementation used consistently.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `len/4` heuristic, the documented fallback. Non-empty text counts at
/// least one token.
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            0
        } else {
            (text.len() / 4).max(1)
        }
    }
}

/// Usage snapshot for one session.
#[derive(Clone, Debug, Serialize)]
pub struct ContextUsage {
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub utilization: f64,
    pub available: usize,
    pub messages: usize,
    pub compactions: u32,
    pub will_compact_at: usize,
}

/// Manager-wide counters.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ContextManagerStats {
    pub total_compactions: u64,
    pub tokens_saved: u64,
    pub sessions_created: u64,
    pub active_sessions: usize,
}

#[derive(Default)]
struct StatsInner {
    total_compactions: u64,
    tokens_saved: u64,
    sessions_created: u64,
}

/// Per-session message buffers with auto-compaction.
pub struct ContextWindowManager {
    max_tokens: usize,
    compact_trigger: usize,
    keep_recent: usize,
    counter: Arc<dyn TokenCounter>,
    compactor: SmartCompactor,
    sessions: DashMap<String, Arc<tokio::sync::Mutex<ConversationSession>>>,
    stats: Mutex<StatsInner>,
}

impl ContextWindowManager {
    /// Defaults: 126 000 token budget, compaction at 80%, last 10 messages
    /// kept verbatim, heuristic token counting, rule-based summaries.
    pub fn new() -> Self {
        Self::with_budget(126_000, 0.80, 10)
    }

    pub fn with_budget(max_tokens: usize, compact_threshold: f64, keep_recent: usize) -> Self {
        Self {
            max_tokens,
            compact_trigger: (max_tokens as f64 * compact_threshold) as usize,
            keep_recent,
            counter: Arc::new(HeuristicTokenCounter),
            compactor: SmartCompactor::rule_based(),
            sessions: DashMap::new(),
            stats: Mutex::new(StatsInner::default()),
        }
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_compactor(mut self, compactor: SmartCompactor) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn compact_trigger(&self) -> usize {
        self.compact_trigger
    }

    fn session_handle(&self, session_id: &str) -> Arc<tokio::sync::Mutex<ConversationSession>> {
        if let Some(existing) = self.sessions.get(session_id) {
            return Arc::clone(existing.value());
        }
        let mut inserted = false;
        let handle = {
            let entry = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    inserted = true;
                    Arc::new(tokio::sync::Mutex::new(ConversationSession::new(
                        session_id.to_string(),
                    )))
                });
            Arc::clone(entry.value())
        };
        if inserted {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.sessions_created += 1;
            info!(session = %session_id, "created session with fresh token budget");
        }
        handle
    }

    /// Appends a message, counting its tokens, and compacts when the total
    /// crosses the trigger. Returns true when compaction fired.
    ///
    /// Compaction runs while holding the session lock, so concurrent
    /// appends observe either the pre- or post-compaction state, never a
    /// partial one.
    pub async fn add_message(&self, session_id: &str, role: Role, content: &str) -> bool {
        self.add_message_with_metadata(session_id, role, content, None)
            .await
    }

    pub async fn add_message_with_metadata(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<Value>,
    ) -> bool {
        let handle = self.session_handle(session_id);
        let mut session = handle.lock().await;

        let tokens = self.counter.count(content);
        let mut entry = MessageEntry::new(role, content.to_string(), tokens);
        if let Some(metadata) = metadata {
            entry = entry.with_metadata(metadata);
        }
        session.messages.push(entry);
        session.total_tokens += tokens;

        debug!(
            session = %session_id,
            tokens,
            total = session.total_tokens,
            max = self.max_tokens,
            "message appended"
        );

        if session.total_tokens >= self.compact_trigger {
            self.compact(&mut session).await;
            return true;
        }
        false
    }

    /// Replaces everything but the recent tail with one summary message.
    async fn compact(&self, session: &mut ConversationSession) {
        if session.messages.len() <= self.keep_recent {
            debug!(session = %session.session_id, "too few messages to compact");
            return;
        }

        let split = session.messages.len() - self.keep_recent;
        let old: Vec<MessageEntry> = session.messages.drain(..split).collect();
        let old_tokens: usize = old.iter().map(|m| m.tokens).sum();

        let summary_content = self.compactor.summarize(&old).await;
        let summary_tokens = self.counter.count(&summary_content);

        let summary = MessageEntry::new(Role::System, summary_content, summary_tokens)
            .with_metadata(serde_json::json!({
                "is_summary": true,
                "original_messages": old.len(),
                "original_tokens": old_tokens,
            }));

        session.messages.insert(0, summary);
        session.total_tokens = session.messages.iter().map(|m| m.tokens).sum();
        session.compaction_count += 1;
        session.last_compacted_at = Some(SystemTime::now());

        let saved = old_tokens.saturating_sub(summary_tokens);
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.total_compactions += 1;
            stats.tokens_saved += saved as u64;
        }

        info!(
            session = %session.session_id,
            old_tokens,
            summary_tokens,
            saved,
            compacted_messages = old.len(),
            "conversation compacted"
        );
    }

    /// Conversation in canonical `{role, content}` form. Summaries are
    /// system messages; pass `include_system = false` to filter them (and
    /// any other system entries) for display purposes.
    pub async fn context_for_llm(&self, session_id: &str, include_system: bool) -> Vec<ChatMessage> {
        let handle = self.session_handle(session_id);
        let session = handle.lock().await;
        session
            .messages
            .iter()
            .filter(|m| include_system || m.role != Role::System)
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    /// Usage snapshot for one session.
    pub async fn token_usage(&self, session_id: &str) -> ContextUsage {
        let handle = self.session_handle(session_id);
        let session = handle.lock().await;
        ContextUsage {
            total_tokens: session.total_tokens,
            max_tokens: self.max_tokens,
            utilization: session.total_tokens as f64 / self.max_tokens as f64,
            available: self.max_tokens.saturating_sub(session.total_tokens),
            messages: session.messages.len(),
            compactions: session.compaction_count,
            will_compact_at: self.compact_trigger,
        }
    }

    /// Discards a session; the next append starts from a fresh budget.
    pub fn reset_session(&self, session_id: &str) {
        if let Some((_, handle)) = self.sessions.remove(session_id) {
            if let Ok(session) = handle.try_lock() {
                info!(
                    session = %session_id,
                    tokens = session.total_tokens,
                    messages = session.messages.len(),
                    compactions = session.compaction_count,
                    "session reset"
                );
            }
        }
    }

    pub fn stats(&self) -> ContextManagerStats {
        let active_sessions = self.sessions.len();
        let inner = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        ContextManagerStats {
            total_compactions: inner.total_compactions,
            tokens_saved: inner.tokens_saved,
            sessions_created: inner.sessions_created,
            active_sessions,
        }
    }
}

impl Default for ContextWindowManager {
    fn default() -> Self {
        Self::new()
    }
}
