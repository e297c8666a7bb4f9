//! Heartbeat-keyed liveness directory of agent workers.

pub mod directory;
pub mod heartbeat;
pub mod model;

pub use directory::AgentRegistry;
pub use heartbeat::spawn_heartbeat_loop;
pub use model::{
    AgentRuntimeRegistration, Heartbeat, ONLINE_WINDOW_MS, PerformanceCounters, RuntimeMetadata,
};
