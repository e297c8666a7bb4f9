//! Heartbeat-keyed directory of running agent workers.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::registry::model::AgentRuntimeRegistration;
use crate::store::TaskStore;

/// Liveness queries over the registrations workers write on every heartbeat.
///
/// Online status is always derived from the stored heartbeat timestamp at
/// query time; nothing ever rewrites a registration to mark it offline.
pub struct AgentRegistry {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Stamp the heartbeat with the current time and store the registration.
    pub async fn heartbeat(
        &self,
        mut registration: AgentRuntimeRegistration,
    ) -> Result<AgentRuntimeRegistration, StoreError> {
        registration.heartbeat.last_heartbeat_at = self.clock.now();
        self.store.upsert_registration(&registration).await?;
        tracing::debug!(
            agent_id = %registration.agent_id,
            runtime_id = %registration.runtime_id,
            "Heartbeat recorded"
        );
        Ok(registration)
    }

    /// Most recent registration for an agent, online or not.
    pub async fn get_registration(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentRuntimeRegistration>, StoreError> {
        self.store.get_registration(agent_id).await
    }

    /// True if the agent's last heartbeat is younger than the online window.
    pub async fn is_agent_online(&self, agent_id: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self
            .store
            .get_registration(agent_id)
            .await?
            .is_some_and(|reg| reg.is_online_at(now)))
    }

    /// Every registration currently considered online.
    pub async fn get_online_agents(&self) -> Result<Vec<AgentRuntimeRegistration>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .store
            .list_registrations()
            .await?
            .into_iter()
            .filter(|reg| reg.is_online_at(now))
            .collect())
    }
}
