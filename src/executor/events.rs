//! Executor status and lifecycle events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Executor-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Nothing running, nothing queued.
    Idle,
    /// At least one task running.
    Busy,
    /// `stop()` was called. Terminal for this executor.
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

/// Broadcast to every subscriber of an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    TaskQueued {
        task_id: Uuid,
        queue_len: usize,
    },
    TaskStarted {
        task_id: Uuid,
        /// 1 for the first attempt.
        attempt: u32,
    },
    TaskRetrying {
        task_id: Uuid,
        retry_count: u32,
        delay_ms: u64,
        error: String,
    },
    TaskCompleted {
        task_id: Uuid,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: Uuid,
        error: String,
    },
    StatusChanged {
        from: AgentStatus,
        to: AgentStatus,
    },
}

impl ExecutorEvent {
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskQueued { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskRetrying { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => Some(*task_id),
            Self::StatusChanged { .. } => None,
        }
    }
}

/// Snapshot of the executor's in-memory bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub queued: usize,
    pub running: usize,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}
