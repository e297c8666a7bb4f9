//! Task state machine.

use serde::{Deserialize, Serialize};

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for an executor slot (fresh, or re-armed after a failed attempt).
    Pending,
    /// Being executed by an agent worker.
    #[serde(alias = "processing")]
    Running,
    /// Finished successfully.
    Completed,
    /// Failed with retries exhausted.
    Failed,
    /// Stayed in processing longer than its declared timeout.
    Timeout,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            // From Pending
            (Pending, Running) | (Pending, Timeout) |
            // From Running
            (Running, Completed) | (Running, Failed) |
            (Running, Pending) | (Running, Timeout)
        )
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" | "processing" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Timeout));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Timeout));
    }

    #[test]
    fn nothing_leaves_a_terminal_state() {
        let all = [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Timeout,
        ];
        for terminal in all.iter().filter(|s| s.is_terminal()) {
            for target in all {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} -> {target} must be rejected"
                );
            }
        }
    }

    #[test]
    fn pending_cannot_skip_running() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn processing_alias_parses() {
        let parsed: TaskStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(parsed, TaskStatus::Running);
        assert_eq!("processing".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
        assert_eq!(serde_json::to_string(&TaskStatus::Running).unwrap(), "\"running\"");
    }
}
