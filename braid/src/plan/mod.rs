//! Tool plans: a topologically-layered selection of tools sufficient to
//! answer a query.
//!
//! Produced by the [`SmartPlanner`] hierarchy (pattern match → semantic
//! cache → plan cache → LLM) and consumed by the executor's
//! `from_tool_plan` conversion.

mod pattern;
mod planner;
mod prompt;
mod semantic;

pub use pattern::{PatternMatcher, PatternRule};
pub use planner::{PlannerStatsSnapshot, SmartPlanner, SmartPlannerConfig};
pub use prompt::build_planning_prompt;
pub use semantic::{SemanticCache, SemanticCacheStats};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A plan's structural defects, reported by [`ToolPlan::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanValidationError {
    /// A parallel group names a tool missing from the declared tool list.
    #[error("group tool '{0}' is not in the declared tool list")]
    UnknownGroupTool(String),

    /// A declared tool appears in no parallel group.
    #[error("tool '{0}' appears in no parallel group")]
    MissingFromGroups(String),

    /// A tool appears in more than one group (the layering would not be a
    /// partition).
    #[error("tool '{0}' appears in more than one group")]
    DuplicateTool(String),

    /// Groups must be non-empty.
    #[error("plan contains an empty parallel group")]
    EmptyGroup,
}

/// An ordered list of parallel groups over a declared tool list.
///
/// Group *k+1* depends on completion of all members of groups *0..k*. The
/// union of tools across groups equals the declared tool list (checked by
/// [`validate`](ToolPlan::validate)). An empty tool list is a legal plan
/// meaning "answer conversationally without tools".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolPlan {
    /// All tools this plan will run.
    pub tools: Vec<String>,
    /// Topological layering: tools within a group may run concurrently.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
    /// Why these tools were selected.
    #[serde(default)]
    pub reasoning: String,
    /// Guidance carried into the final synthesis prompt.
    #[serde(default)]
    pub expected_synthesis: String,
}

impl ToolPlan {
    /// A plan with no tools: answer conversationally.
    pub fn conversational(reasoning: impl Into<String>) -> Self {
        Self {
            tools: Vec::new(),
            parallel_groups: Vec::new(),
            reasoning: reasoning.into(),
            expected_synthesis: String::new(),
        }
    }

    /// A single-group plan: all tools run in parallel.
    pub fn all_parallel<I, S>(tools: I, reasoning: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tools: Vec<String> = tools.into_iter().map(Into::into).collect();
        Self {
            parallel_groups: if tools.is_empty() {
                Vec::new()
            } else {
                vec![tools.clone()]
            },
            tools,
            reasoning: reasoning.into(),
            expected_synthesis: String::new(),
        }
    }

    pub fn with_expected_synthesis(mut self, expected: impl Into<String>) -> Self {
        self.expected_synthesis = expected.into();
        self
    }

    pub fn is_conversational(&self) -> bool {
        self.tools.is_empty()
    }

    /// Checks the layering invariant: groups partition exactly the declared
    /// tool list and no group is empty.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        let declared: HashSet<&str> = self.tools.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for group in &self.parallel_groups {
            if group.is_empty() {
                return Err(PlanValidationError::EmptyGroup);
            }
            for tool in group {
                if !declared.contains(tool.as_str()) {
                    return Err(PlanValidationError::UnknownGroupTool(tool.clone()));
                }
                if !seen.insert(tool.as_str()) {
                    return Err(PlanValidationError::DuplicateTool(tool.clone()));
                }
            }
        }
        for tool in &self.tools {
            if !seen.contains(tool.as_str()) {
                return Err(PlanValidationError::MissingFromGroups(tool.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_parallel_builds_single_group() {
        let plan = ToolPlan::all_parallel(["a", "b"], "two independent reads");
        assert_eq!(plan.tools.len(), 2);
        assert_eq!(plan.parallel_groups, vec![vec!["a".to_string(), "b".to_string()]]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn conversational_plan_is_valid_and_empty() {
        let plan = ToolPlan::conversational("no tools needed");
        assert!(plan.is_conversational());
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn validate_rejects_tool_missing_from_groups() {
        let plan = ToolPlan {
            tools: vec!["a".to_string(), "b".to_string()],
            parallel_groups: vec![vec!["a".to_string()]],
            reasoning: String::new(),
            expected_synthesis: String::new(),
        };
        assert_eq!(
            plan.validate(),
            Err(PlanValidationError::MissingFromGroups("b".to_string()))
        );
    }

    #[test]
    fn validate_rejects_unknown_group_tool_and_duplicates() {
        let unknown = ToolPlan {
            tools: vec!["a".to_string()],
            parallel_groups: vec![vec!["a".to_string(), "ghost".to_string()]],
            reasoning: String::new(),
            expected_synthesis: String::new(),
        };
        assert_eq!(
            unknown.validate(),
            Err(PlanValidationError::UnknownGroupTool("ghost".to_string()))
        );

        let duplicated = ToolPlan {
            tools: vec!["a".to_string()],
            parallel_groups: vec![vec!["a".to_string()], vec!["a".to_string()]],
            reasoning: String::new(),
            expected_synthesis: String::new(),
        };
        assert_eq!(
            duplicated.validate(),
            Err(PlanValidationError::DuplicateTool("a".to_string()))
        );
    }

    #[test]
    fn plan_round_trips_through_serde() {
        let plan = ToolPlan::all_parallel(["get_todays_events"], "calendar")
            .with_expected_synthesis("Show events");
        let json = serde_json::to_string(&plan).unwrap();
        let back: ToolPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
