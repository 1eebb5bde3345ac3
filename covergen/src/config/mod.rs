//! Engine configuration loaded from the environment.
//!
//! Every section has usable defaults; only the stage runner needs
//! site-specific paths. Values that are present but unparsable are rejected
//! instead of silently falling back.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assets::CollectorConfig;
use crate::pipeline::PipelineConfig;
use crate::queue::TaskQueueConfig;
use crate::runner::RunnerConfig;
use crate::services::UploadPolicy;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:covergen.db?mode=rwc";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_ASSET_ROOT: &str = "./cover_assets";

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    /// Parent of all `<job_id>/` asset directories.
    pub asset_root: PathBuf,
    #[serde(default)]
    pub upload: UploadPolicy,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub queue: TaskQueueConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            asset_root: PathBuf::from(DEFAULT_ASSET_ROOT),
            upload: UploadPolicy::default(),
            pipeline: PipelineConfig::default(),
            queue: TaskQueueConfig::default(),
            collector: CollectorConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read the configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        if let Some(url) = env.string("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = env.string("LOG_DIR") {
            config.log_dir = dir.into();
        }
        if let Some(root) = env.string("COVER_ASSET_ROOT") {
            config.asset_root = root.into();
        }

        if let Some(formats) = env.string("COVER_ALLOWED_FORMATS") {
            config.upload = config.upload.with_allowed_formats(formats.split(','));
        }
        if let Some(bytes) = env.parse::<u64>("COVER_MAX_UPLOAD_BYTES")? {
            config.upload = config.upload.with_max_upload_bytes(bytes);
        }

        if let Some(secs) = env.parse::<u64>("COVER_MAX_DURATION_SECONDS")? {
            config.pipeline = config.pipeline.with_max_duration_secs(secs);
        }

        if let Some(hours) = env.parse::<u64>("COVER_RESULT_TTL_HOURS")? {
            config.collector = config.collector.with_retention_hours(hours);
        }
        if let Some(secs) = env.parse::<u64>("COVER_GC_INTERVAL_SECS")? {
            config.collector = config.collector.with_interval_secs(secs);
        }

        if let Some(workers) = env.parse::<usize>("COVER_WORKERS")? {
            config.queue = config.queue.with_workers(workers);
        }
        let hard = env
            .parse::<u64>("COVER_TASK_TIME_LIMIT_SECS")?
            .unwrap_or(config.queue.hard_time_limit_secs);
        let soft = env
            .parse::<u64>("COVER_TASK_SOFT_TIME_LIMIT_SECS")?
            .unwrap_or(config.queue.soft_time_limit_secs);
        config.queue = config.queue.with_time_limits(soft, hard);

        let mut runner = config.runner;
        if let Some(path) = env.string("FFMPEG_PATH") {
            runner = runner.with_ffmpeg_path(path);
        }
        if let Some(path) = env.string("FFPROBE_PATH") {
            runner = runner.with_ffprobe_path(path);
        }
        if let Some(path) = env.string("GPT_SOVITS_PYTHON") {
            runner = runner.with_python(path);
        }
        if let Some(path) = env.string("GPT_SOVITS_PROJECT_ROOT") {
            runner = runner.with_project_root(path);
        }
        if let Some(path) = env.string("COVER_SEPARATE_SCRIPT") {
            runner = runner.with_separate_script(path);
        }
        if let Some(path) = env.string("COVER_INFER_SCRIPT") {
            runner = runner.with_infer_script(path);
        }
        if let Some(model) = env.string("COVER_UVR_MODEL") {
            runner = runner.with_uvr_model(model);
        }
        if let Some(device) = env.string("COVER_SEPARATE_DEVICE") {
            runner = runner.with_separate_device(device);
        }
        config.runner = runner;

        config.validate()?;
        debug!(?config, "Loaded engine configuration");
        Ok(config)
    }

    /// Check the sections the engine cannot start without.
    ///
    /// The runner section is validated separately when the stage runner is
    /// built; an incomplete runner only disables submissions.
    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        if self.upload.allowed_formats.is_empty() {
            return Err(Error::config("COVER_ALLOWED_FORMATS must list at least one format"));
        }
        if self.upload.max_upload_bytes == 0 {
            return Err(Error::config("COVER_MAX_UPLOAD_BYTES must be positive"));
        }
        if self.pipeline.max_duration_secs == 0 {
            return Err(Error::config("COVER_MAX_DURATION_SECONDS must be positive"));
        }
        if self.collector.interval_secs == 0 {
            return Err(Error::config("COVER_GC_INTERVAL_SECS must be positive"));
        }
        Ok(())
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-blank value of `key`, trimmed.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| Error::config(format!("invalid {}={:?}: {}", key, raw, e))),
            None => Ok(None),
        }
    }
}
