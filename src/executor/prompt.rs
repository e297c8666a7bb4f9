//! Builds the model request for one task attempt.

use std::time::Duration;

use crate::agents::AgentDefinition;
use crate::llm::{CompletionRequest, ToolDefinition};
use crate::task::TaskInput;

/// Render the task input as the user turn.
///
/// The prompt comes first, then the data payload as pretty JSON, then the
/// context entries sorted by key so the rendering is stable.
pub fn render_input(input: &TaskInput) -> String {
    let mut sections = Vec::new();

    if let Some(prompt) = input.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        sections.push(prompt.to_string());
    }

    if let Some(data) = &input.data {
        let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        sections.push(format!("Data:\n{rendered}"));
    }

    if let Some(context) = input.context.as_ref().filter(|c| !c.is_empty()) {
        let mut entries: Vec<_> = context.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let lines: Vec<String> = entries.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
        sections.push(format!("Context:\n{}", lines.join("\n")));
    }

    sections.join("\n\n")
}

pub fn tool_definitions(definition: &AgentDefinition) -> Vec<ToolDefinition> {
    definition
        .tools
        .iter()
        .map(|binding| ToolDefinition {
            name: binding.name.clone(),
            description: binding.description.clone(),
            parameters: binding.parameters.clone(),
        })
        .collect()
}

pub fn build_request(definition: &AgentDefinition, input: &TaskInput) -> CompletionRequest {
    CompletionRequest {
        model: definition.model.model.clone(),
        system: Some(definition.system_prompt.clone()).filter(|s| !s.is_empty()),
        prompt: render_input(input),
        tools: tool_definitions(definition),
        max_tokens: definition.model.max_tokens,
        temperature: definition.model.temperature,
        timeout: Some(Duration::from_millis(definition.timeout_ms)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn renders_prompt_data_and_sorted_context() {
        let input = TaskInput {
            prompt: Some("Triage this ticket".into()),
            data: Some(serde_json::json!({"ticket": 42})),
            context: Some(HashMap::from([
                ("team".to_string(), "billing".to_string()),
                ("locale".to_string(), "en-GB".to_string()),
            ])),
        };
        let rendered = render_input(&input);
        assert!(rendered.starts_with("Triage this ticket\n\nData:\n"));
        assert!(rendered.contains("\"ticket\": 42"));
        assert!(rendered.ends_with("Context:\n- locale: en-GB\n- team: billing"));
    }

    #[test]
    fn request_carries_agent_settings() {
        let def = AgentDefinition::new("support", "claude-sonnet-4-5")
            .with_system_prompt("You are the support agent.");
        let req = build_request(&def, &TaskInput::prompt("hello"));
        assert_eq!(req.model, "claude-sonnet-4-5");
        assert_eq!(req.system.as_deref(), Some("You are the support agent."));
        assert_eq!(req.prompt, "hello");
        assert!(req.tools.is_empty());
        assert_eq!(req.timeout, Some(Duration::from_millis(300_000)));
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let def = AgentDefinition::new("support", "m");
        assert!(build_request(&def, &TaskInput::default()).system.is_none());
    }
}
