//! Tool registry and the in-process invocation service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::tools::tool::{Tool, ToolInvocation, ToolInvocationResult, ToolInvoker};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the built-in tools.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for tool in crate::tools::builtin::all() {
            registry.register_sync(tool);
        }
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered tool: {}", name);
    }

    /// Register a tool (sync version for startup).
    pub fn register_sync(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Ok(mut tools) = self.tools.try_write() {
            tools.insert(name.clone(), tool);
            tracing::debug!("Registered tool: {}", name);
        }
    }

    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.write().await.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn list(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.try_read().map(|t| t.len()).unwrap_or(0)
    }

    /// Get tool definitions for LLM function calling.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolInvocationResult, ToolError> {
        let start = Instant::now();
        let Some(tool) = self.get(&invocation.tool_name).await else {
            let err = ToolError::NotFound {
                name: invocation.tool_name,
            };
            return Ok(ToolInvocationResult::failure(err.to_string(), start.elapsed()));
        };

        let outcome = tokio::time::timeout(invocation.timeout, tool.execute(invocation.input)).await;
        let duration = start.elapsed();
        let result = match outcome {
            Ok(Ok(output)) => ToolInvocationResult::success(output, duration),
            Ok(Err(e)) => ToolInvocationResult::failure(e.to_string(), duration),
            Err(_) => {
                let err = ToolError::Timeout {
                    name: invocation.tool_name.clone(),
                    timeout: invocation.timeout,
                };
                ToolInvocationResult::failure(err.to_string(), duration)
            }
        };

        tracing::debug!(
            tool = %invocation.tool_name,
            tool_id = %invocation.tool_id,
            duration_ms = duration.as_millis() as u64,
            success = result.error.is_none(),
            "Tool invoked"
        );
        Ok(result)
    }
}
