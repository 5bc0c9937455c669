//! Conversation summarization for compaction.
//!
//! LLM-backed when a model is configured; otherwise (or when the call
//! fails) a rule-based digest: first-sentence topics from user messages,
//! action verbs from assistant messages, and recent-query previews.
//! Compaction failure is never surfaced; the fallback always produces
//! something.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::llm::{CompletionParams, LanguageModel};

use super::{MessageEntry, Role};

const DEFAULT_TARGET_TOKENS: usize = 2000;

/// Verbs that mark an assistant message as an action worth preserving.
const ACTION_VERBS: [&str; 9] = [
    "created", "drafted", "scheduled", "sent", "updated", "found", "searched", "analyzed",
    "checked",
];

/// Summarizer used by the context window manager during compaction.
pub struct SmartCompactor {
    llm: Option<Arc<dyn LanguageModel>>,
    target_tokens: usize,
}

impl SmartCompactor {
    /// Rule-based only.
    pub fn rule_based() -> Self {
        Self {
            llm: None,
            target_tokens: DEFAULT_TARGET_TOKENS,
        }
    }

    /// LLM-backed with rule-based fallback.
    pub fn with_model(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm: Some(llm),
            target_tokens: DEFAULT_TARGET_TOKENS,
        }
    }

    pub fn with_target_tokens(mut self, target_tokens: usize) -> Self {
        self.target_tokens = target_tokens.max(1);
        self
    }

    /// Produces a compact summary of `messages`.
    pub async fn summarize(&self, messages: &[MessageEntry]) -> String {
        if messages.is_empty() {
            return "[Empty conversation]".to_string();
        }

        if let Some(llm) = &self.llm {
            match self.llm_summarize(llm.as_ref(), messages).await {
                Ok(summary) => {
                    info!(
                        messages = messages.len(),
                        target_tokens = self.target_tokens,
                        "summarized conversation with model"
                    );
                    return summary;
                }
                Err(e) => {
                    warn!(error = %e, "model summarization failed, using rule-based fallback");
                }
            }
        }

        self.rule_based_summarize(messages)
    }

    async fn llm_summarize(
        &self,
        llm: &dyn LanguageModel,
        messages: &[MessageEntry],
    ) -> Result<String, crate::error::AgentError> {
        let conversation: Vec<String> = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect();

        let prompt = format!(
            "Summarize this conversation concisely, preserving key information:\n\n\
             {}\n\n\
             Create a summary that:\n\
             1. Captures the user's main goals and questions\n\
             2. Lists key decisions or actions taken\n\
             3. Preserves important context for future queries\n\
             4. Is under {} tokens\n\n\
             Format as:\n\
             [Conversation Summary]\n\
             - User goals: ...\n\
             - Topics discussed: ...\n\
             - Key outcomes: ...\n\
             - Context to remember: ...\n\n\
             Summary:",
            conversation.join("\n\n"),
            self.target_tokens
        );

        let params = CompletionParams {
            temperature: 0.3,
            max_tokens: self.target_tokens as u32,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        };
        llm.complete(&prompt, &params).await
    }

    fn rule_based_summarize(&self, messages: &[MessageEntry]) -> String {
        let user_messages: Vec<&MessageEntry> =
            messages.iter().filter(|m| m.role == Role::User).collect();
        let assistant_messages: Vec<&MessageEntry> = messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();

        let topics = Self::extract_topics(&user_messages);
        let actions = Self::extract_actions(&assistant_messages);

        let mut parts = vec![
            format!("[Summary: {} messages from previous conversation]", messages.len()),
            String::new(),
            "User discussed:".to_string(),
        ];
        for (i, topic) in topics.iter().take(5).enumerate() {
            parts.push(format!("  {}. {}", i + 1, topic));
        }

        if !actions.is_empty() {
            parts.push(String::new());
            parts.push("Actions taken:".to_string());
            for (i, action) in actions.iter().take(3).enumerate() {
                parts.push(format!("  {}. {}", i + 1, action));
            }
        }

        let recent: Vec<&&MessageEntry> = user_messages.iter().rev().take(3).collect();
        if !recent.is_empty() {
            parts.push(String::new());
            parts.push("Recent queries:".to_string());
            for message in recent.into_iter().rev() {
                parts.push(format!("  - {}", Self::preview(&message.content, 80)));
            }
        }

        let mut summary = parts.join("\n");
        // Rough char budget: ~4 chars per token.
        let char_budget = self.target_tokens * 4;
        if summary.len() > char_budget {
            let cut = summary
                .char_indices()
                .take_while(|(idx, _)| *idx < char_budget)
                .last()
                .map(|(idx, c)| idx + c.len_utf8())
                .unwrap_or(summary.len());
            summary.truncate(cut);
            summary.push_str("...");
        }
        summary
    }

    fn extract_topics(user_messages: &[&MessageEntry]) -> Vec<String> {
        let mut topics = Vec::new();
        for message in user_messages {
            let first_sentence = message
                .content
                .split('.')
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            if first_sentence.len() > 10 && first_sentence.len() < 100 {
                topics.push(first_sentence);
            }
        }
        topics
    }

    fn extract_actions(assistant_messages: &[&MessageEntry]) -> Vec<String> {
        let mut actions = BTreeSet::new();
        for message in assistant_messages {
            let lower = message.content.to_lowercase();
            for verb in ACTION_VERBS {
                if !lower.contains(verb) {
                    continue;
                }
                for sentence in message.content.split('.') {
                    if sentence.to_lowercase().contains(verb) {
                        let action = sentence.trim();
                        if action.len() > 10 && action.len() < 100 {
                            actions.insert(action.to_string());
                        }
                        break;
                    }
                }
                break;
            }
        }
        actions.into_iter().collect()
    }

    fn preview(text: &str, max_chars: usize) -> String {
        let flat = text.replace('\n', " ");
        let flat = flat.trim();
        if flat.chars().count() <= max_chars {
            return flat.to_string();
        }
        let truncated: String = flat.chars().take(max_chars).collect();
        match truncated.rfind(' ') {
            Some(idx) if idx > max_chars * 4 / 5 => format!("{}...", &truncated[..idx]),
            _ => format!("{}...", truncated),
        }
    }
}

impl Default for SmartCompactor {
    fn default() -> Self {
        Self::rule_based()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModel;

    fn entry(role: Role, content: &str) -> MessageEntry {
        MessageEntry::new(role, content.to_string(), content.len() / 4)
    }

    #[tokio::test]
    async fn empty_input_yields_placeholder() {
        let compactor = SmartCompactor::rule_based();
        assert_eq!(compactor.summarize(&[]).await, "[Empty conversation]");
    }

    #[tokio::test]
    async fn rule_based_digest_lists_topics_and_actions() {
        let compactor = SmartCompactor::rule_based();
        let messages = vec![
            entry(Role::User, "Can you plan my offsite next month? It matters."),
            entry(Role::Assistant, "I scheduled the offsite for the 14th. Anything else?"),
            entry(Role::User, "Also check flights to Berlin for that week."),
        ];
        let summary = compactor.summarize(&messages).await;
        assert!(summary.contains("3 messages"));
        assert!(summary.contains("Can you plan my offsite next month"));
        assert!(summary.contains("Actions taken:"));
        assert!(summary.contains("scheduled the offsite"));
        assert!(summary.contains("Recent queries:"));
    }

    #[tokio::test]
    async fn model_output_is_used_when_available() {
        let llm = Arc::new(MockModel::with_response("[Conversation Summary] trip planning"));
        let compactor = SmartCompactor::with_model(llm);
        let messages = vec![entry(Role::User, "Plan my trip to Lisbon in spring.")];
        let summary = compactor.summarize(&messages).await;
        assert_eq!(summary, "[Conversation Summary] trip planning");
    }

    /// **Scenario**: a failing model falls back to the rule-based digest;
    /// nothing surfaces.
    #[tokio::test]
    async fn model_failure_falls_back_to_rules() {
        let llm = Arc::new(MockModel::with_response("unused").failing_first(5));
        let compactor = SmartCompactor::with_model(llm);
        let messages = vec![entry(Role::User, "Plan my trip to Lisbon in spring.")];
        let summary = compactor.summarize(&messages).await;
        assert!(summary.contains("[Summary: 1 messages"));
    }

    #[test]
    fn preview_cuts_on_word_boundary() {
        let text = "a very long sentence that keeps going well past the cut point for previews";
        let preview = SmartCompactor::preview(text, 40);
        assert!(preview.len() <= 44);
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn long_digest_is_truncated_to_char_budget() {
        let compactor = SmartCompactor::rule_based().with_target_tokens(10);
        let messages: Vec<MessageEntry> = (0..30)
            .map(|i| {
                entry(
                    Role::User,
                    &format!("Question number {} about a fairly long subject line.", i),
                )
            })
            .collect();
        let summary = compactor.summarize(&messages).await;
        assert!(summary.len() <= 10 * 4 + 3);
    }
}
