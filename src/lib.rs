//! Agent Dispatch — task queue, executors and liveness registry for agent workers.

pub mod agents;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod queue;
pub mod registry;
pub mod store;
pub mod task;
pub mod tools;
