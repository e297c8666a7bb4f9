//! Task records, specifications and the task state machine.

pub mod model;
pub mod spec;
pub mod state;

pub use model::{
    Priority, Task, TaskInput, TaskLease, TaskMetadata, TaskOutput, TaskResult, TaskStats,
    TaskTimestamps, ToolCallResult, TriggerType,
};
pub use spec::{SpecMetadata, TaskSpec};
pub use state::TaskStatus;
