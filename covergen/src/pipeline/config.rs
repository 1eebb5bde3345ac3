//! Pipeline executor configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`super::PipelineExecutor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Longest accepted song, measured after normalization.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
}

fn default_max_duration_secs() -> u64 {
    8 * 60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_duration_secs(mut self, secs: u64) -> Self {
        self.max_duration_secs = secs;
        self
    }
}
