//! Process-wide tool registry: owns tools by name.
//!
//! Every other component references tools by name (a key, not a pointer);
//! the executor resolves names into `Arc<dyn Tool>` handles at scheduling
//! time. Internally synchronized; callers never lock.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::{FnTool, Tool, ToolSpec};

/// Registry of tools keyed by name. Registering under an existing name
/// replaces the previous tool.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its own name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Normalizes an async closure into a tool and registers it.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, super::ToolError>> + Send + 'static,
    {
        self.register(Arc::new(FnTool::new(name, f)));
    }

    /// Resolves a tool handle by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors of all registered tools, sorted by name (stable catalog
    /// order for planning prompts).
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.iter().map(|e| e.value().spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
