//! Agent definitions and the configuration loader interface.

pub mod definition;
pub mod loader;

pub use definition::{AgentDefinition, AgentToolBinding, DEFAULT_MAX_CONCURRENT_TASKS, ModelSettings};
pub use loader::{AgentConfigChange, AgentConfigLoader, StaticConfigLoader};
