//! Agent configuration loading and change notification.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

use crate::agents::definition::AgentDefinition;
use crate::error::ConfigError;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A change to an agent's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentConfigChange {
    Updated { definition: AgentDefinition },
    Removed { agent_id: String },
}

impl AgentConfigChange {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Updated { definition } => &definition.agent_id,
            Self::Removed { agent_id } => agent_id,
        }
    }
}

/// Source of agent definitions.
#[async_trait]
pub trait AgentConfigLoader: Send + Sync {
    async fn get(&self, agent_id: &str) -> Result<Option<AgentDefinition>, ConfigError>;

    async fn list(&self) -> Result<Vec<AgentDefinition>, ConfigError>;

    /// Stream of configuration changes.
    fn subscribe(&self) -> broadcast::Receiver<AgentConfigChange>;
}

/// In-memory loader, optionally seeded from a JSON file holding an array of definitions.
pub struct StaticConfigLoader {
    agents: RwLock<HashMap<String, AgentDefinition>>,
    tx: broadcast::Sender<AgentConfigChange>,
}

impl StaticConfigLoader {
    pub fn new(definitions: Vec<AgentDefinition>) -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let agents = definitions
            .into_iter()
            .map(|d| (d.agent_id.clone(), d))
            .collect();
        Self {
            agents: RwLock::new(agents),
            tx,
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let definitions: Vec<AgentDefinition> = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        tracing::info!(
            path = %path.display(),
            count = definitions.len(),
            "Loaded agent definitions"
        );
        Ok(Self::new(definitions))
    }

    /// Insert or replace a definition and notify subscribers.
    pub async fn upsert(&self, definition: AgentDefinition) {
        self.agents
            .write()
            .await
            .insert(definition.agent_id.clone(), definition.clone());
        // No receivers is fine.
        let _ = self.tx.send(AgentConfigChange::Updated { definition });
    }

    pub async fn remove(&self, agent_id: &str) -> Option<AgentDefinition> {
        let removed = self.agents.write().await.remove(agent_id);
        if removed.is_some() {
            let _ = self.tx.send(AgentConfigChange::Removed {
                agent_id: agent_id.to_string(),
            });
        }
        removed
    }
}

#[async_trait]
impl AgentConfigLoader for StaticConfigLoader {
    async fn get(&self, agent_id: &str) -> Result<Option<AgentDefinition>, ConfigError> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }

    async fn list(&self) -> Result<Vec<AgentDefinition>, ConfigError> {
        let mut all: Vec<AgentDefinition> = self.agents.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(all)
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentConfigChange> {
        self.tx.subscribe()
    }
}
