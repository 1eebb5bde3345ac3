//! In-process task queue for cover jobs.
//!
//! `dispatch` hands out an opaque [`TaskHandle`](crate::domain::TaskHandle)
//! and returns immediately; a fixed set of workers runs one job each,
//! enforcing soft and hard time limits and honoring per-task cancellation.

mod config;
mod task_queue;

pub use config::TaskQueueConfig;
pub use task_queue::{TaskQueue, TaskQueueStats};
