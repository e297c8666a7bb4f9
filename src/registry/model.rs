//! Agent runtime registration records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registration counts as online while its heartbeat is younger than this.
pub const ONLINE_WINDOW_MS: i64 = 300_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMetadata {
    pub version: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub last_heartbeat_at: DateTime<Utc>,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceCounters {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub average_execution_time_ms: f64,
}

/// One running worker instance as seen by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeRegistration {
    pub runtime_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub metadata: RuntimeMetadata,
    pub heartbeat: Heartbeat,
    #[serde(default)]
    pub performance: PerformanceCounters,
}

impl AgentRuntimeRegistration {
    /// Derived liveness: strictly younger than the online window.
    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        crate::clock::millis_between(self.heartbeat.last_heartbeat_at, now) < ONLINE_WINDOW_MS
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_boundary_is_exclusive() {
        let beat = Utc::now();
        let reg = fixtures::registration("agent-a", beat);
        assert!(reg.is_online_at(beat + chrono::Duration::milliseconds(299_999)));
        assert!(!reg.is_online_at(beat + chrono::Duration::milliseconds(300_000)));
    }
}
