//! Typed stage runner configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Settings of the ffmpeg normalization step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
    #[serde(default = "default_codec")]
    pub codec: String,
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u8 {
    2
}

fn default_codec() -> String {
    "pcm_s16le".to_string()
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            codec: default_codec(),
        }
    }
}

/// Vocal separation script invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparateConfig {
    /// Script run as `<python> <script> --project-root .. --input .. --vocal .. --inst ..`.
    #[serde(default)]
    pub script: PathBuf,
    #[serde(default = "default_uvr_model")]
    pub model: String,
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_uvr_model() -> String {
    "HP2_all_vocals".to_string()
}

fn default_device() -> String {
    "cuda".to_string()
}

impl Default for SeparateConfig {
    fn default() -> Self {
        Self {
            script: PathBuf::new(),
            model: default_uvr_model(),
            device: default_device(),
        }
    }
}

/// Voice conversion script invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferConfig {
    /// Script run as `<python> <script> --project-root .. --reference .. --input .. --output ..`.
    #[serde(default)]
    pub script: PathBuf,
}

/// Gains of the final mix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConfig {
    #[serde(default = "default_vocal_gain")]
    pub vocal_gain: f32,
    #[serde(default = "default_instrumental_gain")]
    pub instrumental_gain: f32,
}

fn default_vocal_gain() -> f32 {
    1.0
}

fn default_instrumental_gain() -> f32 {
    0.9
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            vocal_gain: default_vocal_gain(),
            instrumental_gain: default_instrumental_gain(),
        }
    }
}

impl MixConfig {
    /// `-filter_complex` graph mixing input 0 (vocal) over input 1 (instrumental).
    pub fn filter_graph(&self) -> String {
        format!(
            "[0:a]volume={}[v];[1:a]volume={}[i];[v][i]amix=inputs=2:normalize=1[m]",
            fmt_gain(self.vocal_gain),
            fmt_gain(self.instrumental_gain)
        )
    }
}

fn fmt_gain(gain: f32) -> String {
    if gain.fract() == 0.0 {
        format!("{:.1}", gain)
    } else {
        gain.to_string()
    }
}

/// Configuration of [`super::CommandRunner`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,
    #[serde(default = "default_python")]
    pub python: PathBuf,
    /// GPT-SoVITS checkout passed to both scripts.
    #[serde(default)]
    pub project_root: PathBuf,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub separate: SeparateConfig,
    #[serde(default)]
    pub infer: InferConfig,
    #[serde(default)]
    pub mix: MixConfig,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_python() -> PathBuf {
    PathBuf::from("python")
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            python: default_python(),
            project_root: PathBuf::new(),
            normalize: NormalizeConfig::default(),
            separate: SeparateConfig::default(),
            infer: InferConfig::default(),
            mix: MixConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_ffprobe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe_path = path.into();
        self
    }

    pub fn with_python(mut self, path: impl Into<PathBuf>) -> Self {
        self.python = path.into();
        self
    }

    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_root = path.into();
        self
    }

    pub fn with_separate_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.separate.script = path.into();
        self
    }

    pub fn with_infer_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.infer.script = path.into();
        self
    }

    pub fn with_uvr_model(mut self, model: impl Into<String>) -> Self {
        self.separate.model = model.into();
        self
    }

    pub fn with_separate_device(mut self, device: impl Into<String>) -> Self {
        self.separate.device = device.into();
        self
    }

    /// Reject configurations that cannot run a single job.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.ffmpeg_path.as_os_str().is_empty() {
            missing.push("FFMPEG_PATH");
        }
        if self.ffprobe_path.as_os_str().is_empty() {
            missing.push("FFPROBE_PATH");
        }
        if self.python.as_os_str().is_empty() {
            missing.push("GPT_SOVITS_PYTHON");
        }
        if self.project_root.as_os_str().is_empty() {
            missing.push("GPT_SOVITS_PROJECT_ROOT");
        }
        if self.separate.script.as_os_str().is_empty() {
            missing.push("COVER_SEPARATE_SCRIPT");
        }
        if self.infer.script.as_os_str().is_empty() {
            missing.push("COVER_INFER_SCRIPT");
        }
        if self.separate.model.trim().is_empty() {
            missing.push("COVER_UVR_MODEL");
        }
        if !missing.is_empty() {
            return Err(Error::config(format!(
                "stage runner is not configured, missing: {}",
                missing.join(", ")
            )));
        }

        if self.normalize.sample_rate == 0 || self.normalize.channels == 0 {
            return Err(Error::config("normalize sample rate and channels must be positive"));
        }
        if !(self.mix.vocal_gain > 0.0 && self.mix.instrumental_gain > 0.0) {
            return Err(Error::config("mix gains must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> RunnerConfig {
        RunnerConfig::new()
            .with_project_root("/opt/GPT-SoVITS")
            .with_separate_script("scripts/gptsovits_separate.py")
            .with_infer_script("scripts/gptsovits_infer.py")
    }

    #[test]
    fn test_default_is_incomplete() {
        let err = RunnerConfig::default().validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("GPT_SOVITS_PROJECT_ROOT"));
        assert!(msg.contains("COVER_SEPARATE_SCRIPT"));
        assert!(msg.contains("COVER_INFER_SCRIPT"));
        assert!(!msg.contains("FFMPEG_PATH"));
    }

    #[test]
    fn test_complete_config_validates() {
        complete().validate().unwrap();
    }

    #[test]
    fn test_rejects_non_positive_gain() {
        let mut config = complete();
        config.mix.instrumental_gain = 0.0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_default_filter_graph() {
        assert_eq!(
            MixConfig::default().filter_graph(),
            "[0:a]volume=1.0[v];[1:a]volume=0.9[i];[v][i]amix=inputs=2:normalize=1[m]"
        );
    }

    #[test]
    fn test_serde_defaults() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"project_root": "/srv/sovits"}"#).unwrap();
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.separate.model, "HP2_all_vocals");
        assert_eq!(config.separate.device, "cuda");
        assert_eq!(config.normalize.sample_rate, 44_100);
    }
}
