//! Background loops that feed an executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agents::AgentConfigChange;
use crate::executor::executor::{AdmitOutcome, AgentExecutor};
use crate::queue::TaskQueue;

/// Claim up to the executor's free capacity from the shared queue.
///
/// Returns how many tasks were handed to the executor.
pub async fn dispatch_once(queue: &TaskQueue, executor: &AgentExecutor, runtime_id: &str) -> usize {
    let mut dispatched = 0;
    while executor.has_capacity() {
        let task = match queue.claim_next(executor.agent_id(), runtime_id).await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(e) => {
                warn!(agent_id = %executor.agent_id(), error = %e, "Claim failed");
                break;
            }
        };

        match executor.add_task(task.clone()) {
            Ok(AdmitOutcome::Rejected) => {
                if let Err(e) = queue.release_task(&task).await {
                    warn!(task_id = %task.id, error = %e, "Failed to release rejected task");
                }
                break;
            }
            Ok(_) => dispatched += 1,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Executor refused claimed task");
                if let Err(e) = queue.release_task(&task).await {
                    warn!(task_id = %task.id, error = %e, "Failed to release refused task");
                }
                break;
            }
        }
    }
    if dispatched > 0 {
        debug!(agent_id = %executor.agent_id(), dispatched, "Dispatched tasks");
    }
    dispatched
}

/// Poll the shared queue on a fixed interval until `shutdown` flips to true.
pub fn spawn_dispatch_loop(
    queue: Arc<TaskQueue>,
    executor: AgentExecutor,
    runtime_id: String,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(agent_id = %executor.agent_id(), %runtime_id, "Dispatch loop started");
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    dispatch_once(&queue, &executor, &runtime_id).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(agent_id = %executor.agent_id(), "Dispatch loop stopped");
    })
}

/// Apply configuration edits for the executor's agent as they arrive.
pub fn spawn_config_watcher(
    mut changes: broadcast::Receiver<AgentConfigChange>,
    executor: AgentExecutor,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(AgentConfigChange::Updated { definition })
                        if definition.agent_id == executor.agent_id() =>
                    {
                        if let Err(e) = executor.apply_definition(definition) {
                            warn!(error = %e, "Ignoring agent definition");
                        }
                    }
                    Ok(AgentConfigChange::Removed { agent_id }) if agent_id == executor.agent_id() => {
                        warn!(%agent_id, "Agent definition removed; executor keeps its last configuration");
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Config watcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
