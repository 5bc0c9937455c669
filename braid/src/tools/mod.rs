//! Tool abstraction and process-wide registry.
//!
//! A tool is a named, structured-input, structured-output operation the
//! orchestrator can invoke on behalf of the user. Everything the executor
//! sees is the single normalized shape `Arc<dyn Tool>`; closures are
//! normalized into it at registration via [`FnTool`].

mod cached;
mod registry;

pub use cached::CachedTool;
pub use registry::ToolRegistry;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Tool descriptor for the planner: name, description, argument schema.
/// Fields are aligned with the catalog sent to the planning model.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Errors from tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments did not match the tool's expectations.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The registry has no tool under the requested name.
    #[error("tool '{0}' not found")]
    NotFound(String),
}

/// A single tool the orchestrator can invoke.
///
/// Tools are registered by name in a [`ToolRegistry`]; execution steps hold
/// an `Arc<dyn Tool>` handle resolved from the registry at scheduling time.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of this tool within a registry.
    fn name(&self) -> &str;

    /// Descriptor used to build the planner's tool catalog.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool with the given arguments.
    ///
    /// `args` is a JSON object; the result is any JSON value. Errors are
    /// values at the orchestration layer; the executor records them per
    /// step rather than aborting the run.
    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// Adapts an async closure into the normalized [`Tool`] shape.
///
/// This is how "plain async callable" and "record bundling a callable"
/// handle shapes enter the registry: wrapped once here, so the executor
/// only ever sees one shape.
pub struct FnTool {
    name: String,
    description: Option<String>,
    input_schema: Value,
    f: ToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
            f: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        (self.f)(args).await
    }
}
