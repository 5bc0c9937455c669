//! Planning prompt for the L3 model call.

use crate::tools::ToolSpec;

/// System framing for plan generation. The model must answer with one JSON
/// object matching the `ToolPlan` shape.
pub const PLAN_SYSTEM: &str = "\
You are a planning engine for a personal assistant. Given a user request and \
a catalog of available tools, select the tools needed to answer it and group \
them into parallel execution layers.

Output one JSON object with exactly these fields:
  \"tools\": list of tool names to run (may be empty),
  \"parallel_groups\": list of lists; tools in the same list have no \
dependencies on each other and run concurrently, later lists run after all \
earlier lists complete; every listed tool appears in exactly one group,
  \"reasoning\": one sentence on why these tools answer the request,
  \"expected_synthesis\": one sentence describing the final answer's shape.

Rules:
- Only use tool names from the catalog.
- Prefer one parallel group when the tools are independent.
- If the request needs no tools (greetings, opinions, general knowledge), \
return an empty \"tools\" list and empty \"parallel_groups\".";

/// Builds the full planning prompt: system framing, tool catalog, query.
pub fn build_planning_prompt(query: &str, catalog: &[ToolSpec]) -> String {
    let mut prompt = String::from(PLAN_SYSTEM);
    prompt.push_str("\n\nAvailable tools:\n");
    if catalog.is_empty() {
        prompt.push_str("  (none)\n");
    }
    for spec in catalog {
        match &spec.description {
            Some(description) => {
                prompt.push_str(&format!("  - {}: {}\n", spec.name, description))
            }
            None => prompt.push_str(&format!("  - {}\n", spec.name)),
        }
    }
    prompt.push_str("\nUser request: ");
    prompt.push_str(query);
    prompt
}
