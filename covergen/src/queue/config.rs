//! Task queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for [`super::TaskQueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Number of workers; each runs one job at a time.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// A run is killed and the job failed after this many seconds.
    #[serde(default = "default_hard_time_limit_secs")]
    pub hard_time_limit_secs: u64,
    /// A warning is logged once a run exceeds this many seconds.
    #[serde(default = "default_soft_time_limit_secs")]
    pub soft_time_limit_secs: u64,
    /// Idle workers re-check the queue at this interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_workers() -> usize {
    2
}

fn default_hard_time_limit_secs() -> u64 {
    60 * 60
}

fn default_soft_time_limit_secs() -> u64 {
    55 * 60
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            hard_time_limit_secs: default_hard_time_limit_secs(),
            soft_time_limit_secs: default_soft_time_limit_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TaskQueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_time_limits(mut self, soft_secs: u64, hard_secs: u64) -> Self {
        self.soft_time_limit_secs = soft_secs;
        self.hard_time_limit_secs = hard_secs;
        self
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("COVER_WORKERS must be at least 1"));
        }
        if self.hard_time_limit_secs == 0 {
            return Err(Error::config("COVER_TASK_TIME_LIMIT_SECS must be positive"));
        }
        if self.soft_time_limit_secs > self.hard_time_limit_secs {
            return Err(Error::config(
                "COVER_TASK_SOFT_TIME_LIMIT_SECS must not exceed COVER_TASK_TIME_LIMIT_SECS",
            ));
        }
        Ok(())
    }
}
