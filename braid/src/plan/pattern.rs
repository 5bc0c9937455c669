//! L1 of the planner: regex patterns mapped to precomputed plans.
//!
//! Rules are case-insensitive, evaluated in declaration order, first match
//! wins. Matching is pure CPU work on precompiled regexes, safe to run on
//! the scheduler.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ToolPlan;

/// One rule: a pattern and the plan it resolves to.
pub struct PatternRule {
    pub regex: Regex,
    pub plan: ToolPlan,
}

impl PatternRule {
    /// Compiles `pattern` case-insensitively. Panics on an invalid pattern;
    /// rules are built from literals at startup.
    pub fn new(pattern: &str, plan: ToolPlan) -> Self {
        Self {
            regex: Regex::new(&format!("(?i){}", pattern)).expect("pattern rule regex"),
            plan,
        }
    }
}

static DEFAULT_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(what'?s my day|what is (the|my) day like|how'?s my day looking|day overview|today'?s schedule)",
            ToolPlan::all_parallel(
                ["get_todays_events", "get_current_weather", "get_priority_items"],
                "Day overview: calendar, weather, and priorities in parallel",
            )
            .with_expected_synthesis("A short rundown of the day's events, weather, and priorities"),
        ),
        PatternRule::new(
            r"(search (my )?emails?|find emails?|did .* email( me)?)",
            ToolPlan::all_parallel(["search_emails"], "Email search")
                .with_expected_synthesis("Summarize the matching emails"),
        ),
        PatternRule::new(
            r"(am i free|upcoming events|my calendar|next meeting)",
            ToolPlan::all_parallel(["get_upcoming_events"], "Calendar availability")
                .with_expected_synthesis("State whether the requested time is free"),
        ),
        PatternRule::new(
            r"\b(weather|forecast)\b",
            ToolPlan::all_parallel(["get_current_weather"], "Weather lookup")
                .with_expected_synthesis("Current conditions, briefly"),
        ),
        PatternRule::new(
            r"(what should i focus on|priorit)",
            ToolPlan::all_parallel(["get_priority_items"], "Priority check")
                .with_expected_synthesis("Top priorities, ordered"),
        ),
    ]
});

/// L1 matcher over a fixed rule list.
pub struct PatternMatcher {
    rules: Vec<PatternRule>,
}

impl PatternMatcher {
    /// Matcher with the built-in rule set.
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES
                .iter()
                .map(|r| PatternRule {
                    regex: r.regex.clone(),
                    plan: r.plan.clone(),
                })
                .collect(),
        }
    }

    /// Matcher with a custom rule list (declaration order preserved).
    pub fn with_rules(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    /// Appends a rule, evaluated after the existing ones.
    pub fn add_rule(&mut self, rule: PatternRule) {
        self.rules.push(rule);
    }

    /// First matching rule's plan, or `None`.
    pub fn match_query(&self, query: &str) -> Option<ToolPlan> {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(query))
            .map(|rule| rule.plan.clone())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// **Scenario**: the day-overview variations all resolve to the
    /// three-tool single-group plan.
    #[test]
    fn day_overview_variations_match() {
        let matcher = PatternMatcher::new();
        for query in [
            "What's my day like?",
            "How's my day looking?",
            "What is the day like?",
            "day overview",
            "today's schedule",
        ] {
            let plan = matcher.match_query(query).unwrap_or_else(|| {
                panic!("failed to match: {}", query);
            });
            assert!(plan.tools.contains(&"get_todays_events".to_string()));
            assert!(plan.tools.contains(&"get_current_weather".to_string()));
            assert!(plan.tools.contains(&"get_priority_items".to_string()));
            assert_eq!(plan.parallel_groups.len(), 1);
            assert_eq!(plan.parallel_groups[0].len(), 3);
        }
    }

    #[test]
    fn email_variations_match() {
        let matcher = PatternMatcher::new();
        for query in [
            "search emails from john",
            "find emails about project",
            "did jane email me",
        ] {
            let plan = matcher
                .match_query(query)
                .unwrap_or_else(|| panic!("failed to match: {}", query));
            assert_eq!(plan.tools, vec!["search_emails".to_string()]);
        }
    }

    #[test]
    fn unmatched_query_returns_none() {
        let matcher = PatternMatcher::new();
        assert!(matcher.match_query("translate this to french").is_none());
    }

    #[test]
    fn first_match_wins_in_declaration_order() {
        // "today's schedule" also contains no weather words; but a query
        // hitting both day-overview and weather rules takes the earlier one.
        let matcher = PatternMatcher::new();
        let plan = matcher.match_query("what's my day like, weather-wise?").unwrap();
        assert_eq!(plan.tools.len(), 3, "day-overview rule is declared first");
    }

    /// **Scenario**: match cost stays ≤ 1 ms amortized over 400 queries.
    #[test]
    fn match_cost_is_amortized_under_a_millisecond() {
        let matcher = PatternMatcher::new();
        let queries: Vec<&str> = [
            "What's my day like?",
            "How's the weather?",
            "Am I free tomorrow?",
            "What should I focus on?",
        ]
        .repeat(100);

        let start = Instant::now();
        for query in &queries {
            let _ = matcher.match_query(query);
        }
        let avg = start.elapsed() / queries.len() as u32;
        assert!(
            avg < std::time::Duration::from_millis(1),
            "pattern matching too slow: {:?} avg",
            avg
        );
    }
}
