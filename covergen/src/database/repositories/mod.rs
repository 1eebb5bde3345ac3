//! Repository layer for database access.

pub mod history;
pub mod job;

pub use history::{HistoryPage, HistoryRepository, SqlxHistoryRepository};
pub use job::{JobRepository, SqlxJobRepository};
