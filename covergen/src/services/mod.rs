//! Service layer module.
//!
//! This module provides the cover job service and the container that wires
//! it to the store, runner and task queue.

pub mod container;
pub mod cover;
pub mod upload;

pub use container::{ServiceContainer, ServiceStats};
pub use cover::{
    CoverResult, CoverService, CoverSubmission, INTERRUPTED_MESSAGE, JobStatusView,
    RecoveryReport, SubmittedJob,
};
pub use upload::{DEFAULT_EXTENSION, Upload, UploadPolicy};
