//! In-process `TaskStore` backend.
//!
//! One write lock per operation gives the same all-or-nothing behavior the
//! libSQL backend gets from transactions. The availability switch lets tests
//! exercise the `StoreUnavailable` paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::registry::AgentRuntimeRegistration;
use crate::store::traits::{QueueList, TaskStore, record_expires_at};
use crate::task::{Task, TaskLease, TaskStats, TaskStatus};

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<Uuid, Task>,
    pending: VecDeque<Uuid>,
    processing: VecDeque<Uuid>,
    failed: VecDeque<Uuid>,
    stats: TaskStats,
    registrations: HashMap<String, AgentRuntimeRegistration>,
}

impl MemoryState {
    fn list(&self, list: QueueList) -> &VecDeque<Uuid> {
        match list {
            QueueList::Pending => &self.pending,
            QueueList::Processing => &self.processing,
            QueueList::Failed => &self.failed,
        }
    }
}

/// Remove the first occurrence of `id`. Returns whether one was removed.
fn remove_one(list: &mut VecDeque<Uuid>, id: Uuid) -> bool {
    match list.iter().position(|entry| *entry == id) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}

/// In-memory task store.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        for task in tasks {
            state.tasks.insert(task.id, task.clone());
            state.pending.push_back(task.id);
        }
        let n = tasks.len() as u64;
        state.stats.pending += n;
        state.stats.total += n;
        debug!(count = n, "Tasks inserted");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&task.id) {
            Some(stored) if !stored.status.is_terminal() => {
                *stored = task.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_pending(
        &self,
        agent_id: &str,
        lease: TaskLease,
    ) -> Result<Option<Task>, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let position = state.pending.iter().position(|id| {
            state
                .tasks
                .get(id)
                .is_some_and(|t| t.agent_id == agent_id)
        });
        let Some(pos) = position else {
            return Ok(None);
        };
        let Some(id) = state.pending.remove(pos) else {
            return Ok(None);
        };

        let claimed = match state.tasks.get_mut(&id) {
            Some(task) => {
                task.timestamps.updated_at = lease.claimed_at;
                task.lease = Some(lease);
                task.clone()
            }
            None => return Ok(None),
        };
        state.processing.push_back(id);
        state.stats.pending = state.stats.pending.saturating_sub(1);
        state.stats.processing += 1;
        Ok(Some(claimed))
    }

    async fn finish_task(&self, task: &Task) -> Result<bool, StoreError> {
        self.check_available()?;
        if !task.status.is_terminal() {
            return Err(StoreError::Query(format!(
                "finish_task: task {} is not terminal ({})",
                task.id, task.status
            )));
        }
        let mut state = self.state.write().await;
        if !remove_one(&mut state.processing, task.id) {
            return Ok(false);
        }
        state.tasks.insert(task.id, task.clone());
        state.stats.processing = state.stats.processing.saturating_sub(1);
        if task.status == TaskStatus::Completed {
            state.stats.completed += 1;
        } else {
            state.failed.push_back(task.id);
            state.stats.failed += 1;
        }
        Ok(true)
    }

    async fn release_task(&self, task: &Task) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !remove_one(&mut state.processing, task.id) {
            return Ok(false);
        }
        let mut released = task.clone();
        released.lease = None;
        state.tasks.insert(task.id, released);
        state.pending.push_back(task.id);
        state.stats.processing = state.stats.processing.saturating_sub(1);
        state.stats.pending += 1;
        Ok(true)
    }

    async fn processing_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .processing
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }

    async fn list_members(&self, list: QueueList) -> Result<Vec<Uuid>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.list(list).iter().copied().collect())
    }

    async fn list_len(&self, list: QueueList) -> Result<usize, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.list(list).len())
    }

    async fn stats(&self) -> Result<TaskStats, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.stats)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let before = state.tasks.len();
        state.tasks.retain(|_, task| record_expires_at(task) > now);
        Ok(before - state.tasks.len())
    }

    async fn upsert_registration(
        &self,
        registration: &AgentRuntimeRegistration,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.state
            .write()
            .await
            .registrations
            .insert(registration.agent_id.clone(), registration.clone());
        Ok(())
    }

    async fn get_registration(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentRuntimeRegistration>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.registrations.get(agent_id).cloned())
    }

    async fn list_registrations(&self) -> Result<Vec<AgentRuntimeRegistration>, StoreError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .registrations
            .values()
            .cloned()
            .collect())
    }
}
