use async_trait::async_trait;
use chrono::Utc;

use crate::error::ToolError;
use crate::tools::tool::Tool;

/// Current UTC time.
pub struct TimeTool;

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let now = Utc::now();
        Ok(serde_json::json!({
            "iso": now.to_rfc3339(),
            "unix_ms": now.timestamp_millis(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_iso_and_unix() {
        let out = TimeTool.execute(serde_json::json!({})).await.unwrap();
        assert!(out["iso"].as_str().unwrap().contains('T'));
        assert!(out["unix_ms"].as_i64().unwrap() > 0);
    }
}
