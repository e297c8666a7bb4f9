//! Task record types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::TaskStatus;

/// Default task timeout: 5 minutes.
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 300_000;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What produced the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Webhook,
    Schedule,
    Event,
    Api,
}

/// Stored with the task. Dispatch order ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Opaque task payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, String>>,
}

impl TaskInput {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub source: String,
    /// Milliseconds the task may spend in processing before the reaper times it out.
    pub timeout: u64,
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTimestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of one tool call made while executing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub tool_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Output of a successful attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput {
    pub response: String,
    pub tool_results: Vec<ToolCallResult>,
}

/// Result of the most recent attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Which worker runtime claimed the task off the pending list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLease {
    pub runtime_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// A unit of work for one agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub agent_id: String,
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub status: TaskStatus,
    pub input: TaskInput,
    pub metadata: TaskMetadata,
    pub timestamps: TaskTimestamps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<TaskLease>,
}

impl Task {
    /// Transition to a new status, stamping the matching timestamps with `now`.
    pub fn transition_to(&mut self, new_status: TaskStatus, now: DateTime<Utc>) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Task {}: cannot transition from {} to {}",
                self.id, self.status, new_status
            ));
        }

        self.status = new_status;
        self.timestamps.updated_at = now;

        match new_status {
            TaskStatus::Running if self.timestamps.started_at.is_none() => {
                self.timestamps.started_at = Some(now);
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout => {
                self.timestamps.completed_at = Some(now);
            }
            _ => {}
        }

        Ok(())
    }

    /// Milliseconds since the task was created.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        crate::clock::millis_between(self.timestamps.created_at, now)
    }

    /// True once the task has lived longer than its declared timeout.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        // Timeouts beyond i64::MAX milliseconds never elapse.
        i64::try_from(self.metadata.timeout).is_ok_and(|limit| self.age_ms(now) > limit)
    }

    /// Whether another attempt is allowed after a failure.
    pub fn has_retries_left(&self) -> bool {
        self.metadata.retry_count < self.metadata.max_retries
    }

    /// The most recent error recorded on the task.
    pub fn last_error(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_stamp_timestamps() {
        let t0 = Utc::now();
        let mut task = fixtures::task("agent-a", t0);

        let t1 = t0 + chrono::Duration::seconds(1);
        task.transition_to(TaskStatus::Running, t1).unwrap();
        assert_eq!(task.timestamps.started_at, Some(t1));
        assert_eq!(task.timestamps.updated_at, t1);
        assert!(task.timestamps.completed_at.is_none());

        let t2 = t1 + chrono::Duration::seconds(2);
        task.transition_to(TaskStatus::Completed, t2).unwrap();
        assert_eq!(task.timestamps.completed_at, Some(t2));
        assert_eq!(task.timestamps.created_at, t0);
    }

    #[test]
    fn started_at_is_kept_across_retries() {
        let t0 = Utc::now();
        let mut task = fixtures::task("agent-a", t0);
        task.transition_to(TaskStatus::Running, t0).unwrap();
        task.transition_to(TaskStatus::Pending, t0 + chrono::Duration::seconds(1))
            .unwrap();
        task.transition_to(TaskStatus::Running, t0 + chrono::Duration::seconds(2))
            .unwrap();
        assert_eq!(task.timestamps.started_at, Some(t0));
    }

    #[test]
    fn terminal_transition_is_rejected() {
        let now = Utc::now();
        let mut task = fixtures::task("agent-a", now);
        task.transition_to(TaskStatus::Running, now).unwrap();
        task.transition_to(TaskStatus::Failed, now).unwrap();
        assert!(task.transition_to(TaskStatus::Pending, now).is_err());
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn expiry_is_strictly_greater_than_timeout() {
        let t0 = Utc::now();
        let mut task = fixtures::task("agent-a", t0);
        task.metadata.timeout = 5000;
        assert!(!task.is_expired(t0 + chrono::Duration::milliseconds(5000)));
        assert!(task.is_expired(t0 + chrono::Duration::milliseconds(5001)));
    }

    #[test]
    fn huge_timeout_never_expires() {
        let t0 = Utc::now();
        let mut task = fixtures::task("agent-a", t0);
        task.metadata.timeout = u64::MAX;
        assert!(!task.is_expired(t0 + chrono::Duration::milliseconds(1)));
        assert!(!task.is_expired(t0 + chrono::Duration::days(365 * 100)));

        task.metadata.timeout = i64::MAX as u64;
        assert!(!task.is_expired(t0 + chrono::Duration::days(1)));
    }

    #[test]
    fn serializes_camel_case() {
        let task = fixtures::task("agent-a", Utc::now());
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["agentId"], "agent-a");
        assert_eq!(json["triggerType"], "api");
        assert_eq!(json["metadata"]["retryCount"], 0);
        assert_eq!(json["metadata"]["maxRetries"], 3);
        assert!(json["timestamps"]["createdAt"].is_string());
        assert!(json.get("lease").is_none());
    }
}
