//! Persistence layer — task records, queue lists, counters and the agent registry.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;
pub use traits::{QueueList, TaskStore};
