//! Agent definitions: model settings, tool bindings and execution limits.

use serde::{Deserialize, Serialize};

use crate::task::model::DEFAULT_TASK_TIMEOUT_MS;

/// Default number of tasks one executor runs at once.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 5;

fn default_max_concurrent_tasks() -> usize {
    DEFAULT_MAX_CONCURRENT_TASKS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TASK_TIMEOUT_MS
}

fn default_max_tokens() -> u32 {
    4096
}

/// Model selection and sampling settings for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// A tool the agent may call, as exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentToolBinding {
    pub tool_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema")]
    pub parameters: serde_json::Value,
    /// Per-call timeout; falls back to the agent's `timeout_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Everything an executor needs to know about the agent it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub agent_id: String,
    pub name: String,
    pub model: ModelSettings,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<AgentToolBinding>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl AgentDefinition {
    pub fn new(agent_id: impl Into<String>, model: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            name: agent_id.clone(),
            agent_id,
            model: ModelSettings {
                model: model.into(),
                temperature: None,
                max_tokens: default_max_tokens(),
            },
            system_prompt: String::new(),
            tools: Vec::new(),
            capabilities: Vec::new(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_tool(mut self, binding: AgentToolBinding) -> Self {
        self.tools.push(binding);
        self
    }

    /// Concurrency ceiling, never below one.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_tasks.max(1)
    }

    /// Binding for the tool the model asked for, matched by name.
    pub fn tool_binding(&self, name: &str) -> Option<&AgentToolBinding> {
        self.tools.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let def: AgentDefinition = serde_json::from_str(
            r#"{"agentId": "support", "name": "Support", "model": {"model": "claude-sonnet-4-5"}}"#,
        )
        .unwrap();
        assert_eq!(def.max_concurrent_tasks, 5);
        assert_eq!(def.timeout_ms, 300_000);
        assert_eq!(def.model.max_tokens, 4096);
        assert!(def.tools.is_empty());
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        let def = AgentDefinition::new("a", "m").with_max_concurrent_tasks(0);
        assert_eq!(def.concurrency_limit(), 1);
    }

    #[test]
    fn tool_binding_by_name() {
        let def = AgentDefinition::new("a", "m").with_tool(AgentToolBinding {
            tool_id: "tool-echo".into(),
            name: "echo".into(),
            description: String::new(),
            parameters: empty_schema(),
            timeout_ms: Some(1000),
        });
        assert_eq!(def.tool_binding("echo").unwrap().tool_id, "tool-echo");
        assert!(def.tool_binding("shell").is_none());
    }
}
