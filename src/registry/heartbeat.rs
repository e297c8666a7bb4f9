//! Periodic heartbeat for one running executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::executor::AgentExecutor;
use crate::registry::directory::AgentRegistry;
use crate::registry::model::AgentRuntimeRegistration;

/// Refresh the registration's performance counters from `executor` and write a
/// heartbeat every `interval` until `shutdown` flips to true.
pub fn spawn_heartbeat_loop(
    registry: Arc<AgentRegistry>,
    executor: AgentExecutor,
    template: AgentRuntimeRegistration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut registration = template.clone();
                    registration.performance = executor.metrics();
                    registration.heartbeat.interval_ms = interval.as_millis() as u64;
                    if let Err(e) = registry.heartbeat(registration).await {
                        warn!(agent_id = %template.agent_id, error = %e, "Heartbeat failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
