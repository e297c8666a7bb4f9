//! Per-worker task execution.

pub mod dispatch;
#[allow(clippy::module_inception)]
pub mod executor;
pub mod events;
pub mod prompt;

pub use dispatch::{dispatch_once, spawn_config_watcher, spawn_dispatch_loop};
pub use events::{AgentStatus, ExecutorEvent, ExecutorStats};
pub use executor::{AdmitOutcome, AgentExecutor, ExecutorDeps, RETRY_BASE_DELAY};
