//! Domain layer for covergen.
//!
//! Typed cover jobs and the value objects they are built from.

pub mod job;
pub mod value_objects;

pub use job::{Caller, CoverJob, JobOutputs};
pub use value_objects::*;

pub use crate::database::models::{JobStage, JobStatus};
