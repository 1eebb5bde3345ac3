//! Cover pipeline execution.
//!
//! [`PipelineExecutor`] drives one job through
//! `preprocess -> separate -> infer -> mix -> finalize`, persisting every
//! transition and stopping as soon as it observes a cancellation.

mod config;
mod executor;
mod progress;

pub use config::PipelineConfig;
pub use executor::{PipelineExecutor, RunOutcome};
pub use progress::{Checkpoint, StageReporter};
