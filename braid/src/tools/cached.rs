//! Transparent caching wrapper around a tool handle.
//!
//! The agent wraps each execution step's tool in a `CachedTool` when the
//! tool cache is enabled, so the executor stays cache-unaware.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::ToolCache;
use crate::error::AgentError;

use super::{Tool, ToolError, ToolSpec};

/// Wraps a tool with the tool cache: fresh hits skip execution, stale hits
/// are served while revalidating in the background, misses execute and
/// store.
pub struct CachedTool {
    inner: Arc<dyn Tool>,
    cache: Arc<ToolCache>,
}

impl CachedTool {
    pub fn new(inner: Arc<dyn Tool>, cache: Arc<ToolCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Tool for CachedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn spec(&self) -> ToolSpec {
        self.inner.spec()
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let name = self.inner.name().to_string();
        let tool = Arc::clone(&self.inner);
        let exec_args = args.clone();
        let execute = move || {
            let tool = Arc::clone(&tool);
            let name = name.clone();
            let args = exec_args.clone();
            async move {
                tool.invoke(args).await.map_err(|e| AgentError::Tool {
                    name,
                    message: e.to_string(),
                })
            }
        };
        self.cache
            .get_or_execute(self.inner.name(), &args, execute)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FnTool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn cached_tool_executes_once_for_identical_args() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let inner = Arc::new(FnTool::new("get_current_weather", move |_args| {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({"temp_c": 18}))
            }
        }));
        let cached = CachedTool::new(inner, Arc::new(ToolCache::new()));

        let args = serde_json::json!({"city": "Oslo"});
        for _ in 0..3 {
            let out = cached.invoke(args.clone()).await.unwrap();
            assert_eq!(out["temp_c"], 18);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_tool_propagates_miss_path_failure() {
        let inner = Arc::new(FnTool::new("always_fails", |_| async {
            Err(ToolError::Failed("provider 500".to_string()))
        }));
        let cached = CachedTool::new(inner, Arc::new(ToolCache::new()));
        let err = cached.invoke(serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("provider 500"));
    }
}
