//! Prompt assembly for the final synthesis call and the conversational
//! fallback.

use std::collections::HashMap;

use serde_json::Value;

use crate::context::ChatMessage;
use crate::plan::ToolPlan;

/// Builds the synthesis prompt: the user's question, serialized tool
/// results, which tools failed (if any), the trailing conversation
/// history, and response instructions.
pub fn build_synthesis_prompt(
    user_message: &str,
    plan: &ToolPlan,
    results: &HashMap<String, Value>,
    errors: &HashMap<String, String>,
    history: &[ChatMessage],
    history_tail: usize,
) -> String {
    let results_str = serde_json::to_string_pretty(results)
        .unwrap_or_else(|_| "{}".to_string());

    let mut prompt = format!(
        "You are a helpful AI assistant. Based on the tool results below, provide a \
         natural, conversational response to the user's question.\n\n\
         User's question: {}\n\n\
         Tool results:\n{}\n",
        user_message, results_str
    );

    if !errors.is_empty() {
        let mut failed: Vec<String> = errors
            .iter()
            .map(|(name, error)| format!("  - {}: {}", name, error))
            .collect();
        failed.sort();
        prompt.push_str(&format!(
            "\nSome tools failed and produced no data:\n{}\n",
            failed.join("\n")
        ));
    }

    if !history.is_empty() {
        prompt.push_str("\nConversation history:\n");
        let skip = history.len().saturating_sub(history_tail);
        for message in &history[skip..] {
            prompt.push_str(&format!("{}: {}\n", message.role, message.content));
        }
    }

    prompt.push_str(
        "\nInstructions:\n\
         - Be concise and natural\n\
         - Focus on directly answering the user's question\n\
         - If results are empty or errors occurred, explain politely\n\
         - Don't mention tool names or technical details unless relevant\n\
         - Use a friendly, conversational tone\n",
    );

    if !plan.expected_synthesis.is_empty() {
        prompt.push_str(&format!("- Shape of the answer: {}\n", plan.expected_synthesis));
    }

    prompt.push_str("\nResponse:");
    prompt
}

/// Builds the no-tools fallback prompt from the managed conversation
/// history alone.
pub fn build_conversational_prompt(history: &[ChatMessage]) -> String {
    let mut prompt = String::from(
        "You are a helpful AI assistant. Continue the conversation naturally.\n\n\
         Conversation:\n",
    );
    for message in history {
        prompt.push_str(&format!("{}: {}\n", message.role, message.content));
    }
    prompt.push_str(
        "\nRespond to the last user message. Be concise, natural, and friendly.\n\nResponse:",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: Role::User,
                content: "old question".to_string(),
            },
            ChatMessage {
                role: Role::Assistant,
                content: "old answer".to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: "what's my day like?".to_string(),
            },
        ]
    }

    #[test]
    fn synthesis_prompt_carries_results_history_and_instructions() {
        let plan = ToolPlan::all_parallel(["get_todays_events"], "calendar")
            .with_expected_synthesis("a short rundown");
        let mut results = HashMap::new();
        results.insert(
            "get_todays_events".to_string(),
            serde_json::json!([{"title": "standup", "at": "09:30"}]),
        );

        let prompt = build_synthesis_prompt(
            "what's my day like?",
            &plan,
            &results,
            &HashMap::new(),
            &history(),
            3,
        );

        assert!(prompt.contains("User's question: what's my day like?"));
        assert!(prompt.contains("standup"));
        assert!(prompt.contains("user: old question"));
        assert!(prompt.contains("Be concise and natural"));
        assert!(prompt.contains("a short rundown"));
        assert!(!prompt.contains("Some tools failed"));
    }

    #[test]
    fn failed_tools_are_named_in_the_prompt() {
        let plan = ToolPlan::all_parallel(["a", "b"], "r");
        let mut errors = HashMap::new();
        errors.insert("b".to_string(), "Timeout after 30000ms".to_string());

        let prompt = build_synthesis_prompt(
            "q",
            &plan,
            &HashMap::new(),
            &errors,
            &[],
            3,
        );

        assert!(prompt.contains("Some tools failed"));
        assert!(prompt.contains("b: Timeout after 30000ms"));
    }

    #[test]
    fn history_is_limited_to_the_tail() {
        let plan = ToolPlan::all_parallel(["a"], "r");
        let prompt = build_synthesis_prompt(
            "q",
            &plan,
            &HashMap::new(),
            &HashMap::new(),
            &history(),
            1,
        );
        assert!(!prompt.contains("old question"));
        assert!(prompt.contains("user: what's my day like?"));
    }

    #[test]
    fn conversational_prompt_replays_the_history() {
        let prompt = build_conversational_prompt(&history());
        assert!(prompt.contains("user: old question"));
        assert!(prompt.contains("assistant: old answer"));
        assert!(prompt.ends_with("Response:"));
    }
}
