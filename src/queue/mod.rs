//! Shared task queue and the expired-task reaper.

pub mod reaper;
pub mod task_queue;

pub use reaper::ExpiredTaskReaper;
pub use task_queue::TaskQueue;
