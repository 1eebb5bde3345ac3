//! covergen library crate.
//!
//! Job orchestration for multi-stage cover generation: the job store, the
//! stage pipeline, the task queue and the asset collector.

pub mod assets;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod services;

pub use error::{Error, Result};
