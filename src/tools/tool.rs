//! Tool and tool-invocation interfaces.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ToolError;

/// A capability the model can call while a task runs.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the tool's input.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// One tool call, as handed to the invocation service.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub timeout: Duration,
}

/// What the invocation service reports back. No `error` means success.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationResult {
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl ToolInvocationResult {
    pub fn success(output: serde_json::Value, duration: Duration) -> Self {
        Self {
            output: Some(output),
            error: None,
            duration,
        }
    }

    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            output: None,
            error: Some(error.into()),
            duration,
        }
    }
}

/// Executes tool calls on behalf of the executor.
///
/// `Err` means the invocation service itself failed; a tool that ran and
/// reported a problem comes back as `Ok` with `error` set.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolInvocationResult, ToolError>;
}

/// Extract a required string parameter.
pub fn require_str<'a>(params: &'a serde_json::Value, tool: &str, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing '{key}' parameter"),
        })
}
