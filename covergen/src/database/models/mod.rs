//! Database models.

pub mod history;
pub mod job;

pub use history::{CoverHistoryDbModel, HistoryStatus, NewHistoryEntry};
pub use job::{CoverJobDbModel, JobStage, JobStatus, JobUpdate, NewCoverJob};
