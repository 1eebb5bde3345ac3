//! Job asset directories and their garbage collection.

mod collector;
mod layout;

pub use collector::{AssetCollector, CleanupReport, CollectorConfig};
pub use layout::{AssetLayout, INPUT_DIR, OUTPUT_DIR, WORK_DIR, WorkPaths};
