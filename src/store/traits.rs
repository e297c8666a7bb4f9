//! `TaskStore` trait — the shared task record store, queue lists and counters.
//!
//! Every method is one atomic unit against the backend: a record write, its
//! list membership change and the counter adjustment either all happen or
//! none do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::registry::AgentRuntimeRegistration;
use crate::task::{Task, TaskLease, TaskStats};

/// Records are purged this long after creation.
pub const TASK_RECORD_TTL_DAYS: i64 = 30;

/// The three named membership lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueList {
    Pending,
    Processing,
    Failed,
}

impl QueueList {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-agnostic store shared by producers, workers and the reaper.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Prepare the backend (schema, counter rows).
    async fn init_schema(&self) -> Result<(), StoreError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Persist new PENDING tasks, append them to `pending` in order, and add
    /// `tasks.len()` to both `pending` and `total`.
    async fn insert_tasks(&self, tasks: &[Task]) -> Result<(), StoreError>;

    /// Get a task record by id.
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    /// Overwrite a non-terminal task record. Returns false and writes nothing
    /// when the stored record is missing or already terminal.
    async fn update_task(&self, task: &Task) -> Result<bool, StoreError>;

    /// Move the oldest pending entry for `agent_id` to `processing` and stamp
    /// the lease on its record. Adjusts `pending`/`processing` counters.
    async fn claim_pending(
        &self,
        agent_id: &str,
        lease: TaskLease,
    ) -> Result<Option<Task>, StoreError>;

    /// Record a terminal task: remove one `processing` occurrence, persist the
    /// record, append FAILED/TIMEOUT tasks to `failed` and adjust counters.
    /// Returns false with no writes if the task was not in `processing`.
    async fn finish_task(&self, task: &Task) -> Result<bool, StoreError>;

    /// Hand a claimed task back: remove one `processing` occurrence, persist
    /// the record, append to `pending`. Returns false if it was not claimed.
    async fn release_task(&self, task: &Task) -> Result<bool, StoreError>;

    /// Task records currently in `processing`, in list order.
    async fn processing_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Ids in a membership list, in list order.
    async fn list_members(&self, list: QueueList) -> Result<Vec<Uuid>, StoreError>;

    /// Length of a membership list.
    async fn list_len(&self, list: QueueList) -> Result<usize, StoreError>;

    /// Current aggregate counters.
    async fn stats(&self) -> Result<TaskStats, StoreError>;

    /// Delete task records whose time-to-live has passed. Returns the count.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    // ── Agent registry ──────────────────────────────────────────────

    /// Insert or replace the registration for its agent id.
    async fn upsert_registration(
        &self,
        registration: &AgentRuntimeRegistration,
    ) -> Result<(), StoreError>;

    async fn get_registration(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentRuntimeRegistration>, StoreError>;

    async fn list_registrations(&self) -> Result<Vec<AgentRuntimeRegistration>, StoreError>;
}

/// Expiry instant for a task record.
pub fn record_expires_at(task: &Task) -> DateTime<Utc> {
    task.timestamps.created_at + chrono::Duration::days(TASK_RECORD_TTL_DAYS)
}
