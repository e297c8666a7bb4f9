//! Task specifications as handed in by trigger ingress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

use super::model::{
    DEFAULT_MAX_RETRIES, DEFAULT_TASK_TIMEOUT_MS, Priority, Task, TaskInput, TaskMetadata,
    TaskTimestamps, TriggerType,
};
use super::state::TaskStatus;

/// Upper bound on `maxRetries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecMetadata {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Everything a producer supplies to create a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub agent_id: String,
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub input: TaskInput,
    pub metadata: SpecMetadata,
}

impl TaskSpec {
    /// Minimal spec for an API-triggered task.
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        source: impl Into<String>,
        input: TaskInput,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            trigger_type: TriggerType::Api,
            trigger_id: None,
            priority: None,
            input,
            metadata: SpecMetadata {
                user_id: user_id.into(),
                project_id: None,
                source: source.into(),
                timeout: None,
                max_retries: None,
            },
        }
    }

    pub fn with_trigger(mut self, trigger_type: TriggerType, trigger_id: Option<String>) -> Self {
        self.trigger_type = trigger_type;
        self.trigger_id = trigger_id;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.metadata.timeout = Some(timeout_ms);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.metadata.max_retries = Some(max_retries);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Reject malformed specs before anything touches the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.agent_id.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "agentId" });
        }
        if self.metadata.user_id.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "metadata.userId",
            });
        }
        if self.metadata.source.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "metadata.source",
            });
        }
        if self.metadata.timeout == Some(0) {
            return Err(ValidationError::ZeroTimeout);
        }
        if let Some(max) = self.metadata.max_retries
            && max > MAX_RETRIES_LIMIT
        {
            return Err(ValidationError::TooManyRetries {
                value: max,
                max: MAX_RETRIES_LIMIT,
            });
        }
        Ok(())
    }

    /// Build the PENDING task record for this spec.
    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        Task {
            id: Uuid::new_v4(),
            agent_id: self.agent_id,
            trigger_type: self.trigger_type,
            trigger_id: self.trigger_id,
            priority: self.priority.unwrap_or_default(),
            status: TaskStatus::Pending,
            input: self.input,
            metadata: TaskMetadata {
                user_id: self.metadata.user_id,
                project_id: self.metadata.project_id,
                source: self.metadata.source,
                timeout: self.metadata.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT_MS),
                retry_count: 0,
                max_retries: self.metadata.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            },
            timestamps: TaskTimestamps {
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
            },
            result: None,
            lease: None,
        }
    }
}

/// Validate a whole batch, naming the first offending index.
pub fn validate_batch(specs: &[TaskSpec]) -> Result<(), ValidationError> {
    for (index, spec) in specs.iter().enumerate() {
        spec.validate().map_err(|e| ValidationError::InBatch {
            index,
            source: Box::new(e),
        })?;
    }
    Ok(())
}
