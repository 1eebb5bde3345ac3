//! Cover job domain module.

mod entity;

pub use entity::{Caller, CoverJob, JobOutputs};
