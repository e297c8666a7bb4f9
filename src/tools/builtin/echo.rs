use async_trait::async_trait;

use crate::error::ToolError;
use crate::tools::tool::{Tool, require_str};

/// Returns its `message` parameter unchanged.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo a message back. Useful for testing tool calling."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let message = require_str(&params, self.name(), "message")?;
        Ok(serde_json::json!({ "message": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_message() {
        let out = EchoTool
            .execute(serde_json::json!({"message": "ping"}))
            .await
            .unwrap();
        assert_eq!(out["message"], "ping");
    }

    #[tokio::test]
    async fn missing_message_is_invalid() {
        let err = EchoTool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters { .. }));
    }
}
