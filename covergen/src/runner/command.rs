//! [`StageRunner`] backed by external programs.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::tokio_command;
use tokio::process::Command;
use tracing::info;

use super::config::RunnerConfig;
use super::process::run_captured;
use super::traits::{NormalizedSong, SeparatedStems, StageRunner};
use crate::database::models::JobStage;
use crate::{Error, Result};

/// Runs ffmpeg/ffprobe and the GPT-SoVITS scripts as child processes.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    /// Build a runner, rejecting incomplete configuration.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub(crate) fn normalize_command(&self, input: &Path, output: &Path) -> Command {
        let n = &self.config.normalize;
        let mut cmd = tokio_command(&self.config.ffmpeg_path);
        cmd.arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-vn", "-acodec"])
            .arg(&n.codec)
            .arg("-ac")
            .arg(n.channels.to_string())
            .arg("-ar")
            .arg(n.sample_rate.to_string())
            .arg(output);
        cmd
    }

    pub(crate) fn probe_command(&self, input: &Path) -> Command {
        let mut cmd = tokio_command(&self.config.ffprobe_path);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input);
        cmd
    }

    pub(crate) fn separate_command(&self, song: &Path, vocal_out: &Path, inst_out: &Path) -> Command {
        let sep = &self.config.separate;
        let mut cmd = tokio_command(&self.config.python);
        cmd.arg(&sep.script)
            .arg("--project-root")
            .arg(&self.config.project_root)
            .arg("--input")
            .arg(song)
            .arg("--vocal")
            .arg(vocal_out)
            .arg("--inst")
            .arg(inst_out)
            .arg("--model")
            .arg(&sep.model)
            .arg("--device")
            .arg(&sep.device);
        cmd
    }

    pub(crate) fn infer_command(
        &self,
        reference: &Path,
        vocal: &Path,
        output: &Path,
        model_id: &str,
        pitch_shift: i32,
    ) -> Command {
        let mut cmd = tokio_command(&self.config.python);
        cmd.arg(&self.config.infer.script)
            .arg("--project-root")
            .arg(&self.config.project_root)
            .arg("--reference")
            .arg(reference)
            .arg("--input")
            .arg(vocal)
            .arg("--output")
            .arg(output)
            .arg("--model-id")
            .arg(model_id)
            .arg("--pitch")
            .arg(pitch_shift.to_string());
        cmd
    }

    pub(crate) fn mix_command(&self, vocal: &Path, instrumental: &Path, output: &Path) -> Command {
        let mut cmd = tokio_command(&self.config.ffmpeg_path);
        cmd.arg("-y")
            .arg("-i")
            .arg(vocal)
            .arg("-i")
            .arg(instrumental)
            .arg("-filter_complex")
            .arg(self.config.mix.filter_graph())
            .args(["-map", "[m]", "-c:a", "pcm_s16le"])
            .arg(output);
        cmd
    }

    /// Duration of `input` in seconds, as reported by ffprobe.
    pub async fn probe_duration(&self, input: &Path) -> Result<f64> {
        let output = run_captured(self.probe_command(input), JobStage::Preprocess)
            .await?
            .ensure_success(JobStage::Preprocess)?;
        parse_duration(&output.stdout)
    }
}

fn parse_duration(stdout: &str) -> Result<f64> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| {
            Error::stage_failed(
                JobStage::Preprocess.as_str(),
                format!("unable to parse duration from ffprobe output: {:?}", stdout),
            )
        })
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io_path("creating", parent, e))?;
    }
    Ok(())
}

fn program_name(cmd: &Command) -> String {
    Path::new(cmd.as_std().get_program())
        .file_name()
        .unwrap_or(OsStr::new("?"))
        .to_string_lossy()
        .into_owned()
}

#[async_trait]
impl StageRunner for CommandRunner {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<NormalizedSong> {
        ensure_parent(output).await?;
        let cmd = self.normalize_command(input, output);
        info!(stage = "preprocess", "Normalizing {} with {}", input.display(), program_name(&cmd));
        run_captured(cmd, JobStage::Preprocess)
            .await?
            .ensure_success(JobStage::Preprocess)?;

        let duration_secs = self.probe_duration(output).await?;
        Ok(NormalizedSong {
            path: output.to_path_buf(),
            duration_secs,
        })
    }

    async fn separate(
        &self,
        song: &Path,
        vocal_out: &Path,
        inst_out: &Path,
    ) -> Result<SeparatedStems> {
        ensure_parent(vocal_out).await?;
        ensure_parent(inst_out).await?;
        let cmd = self.separate_command(song, vocal_out, inst_out);
        info!(stage = "separate", model = %self.config.separate.model, "Separating stems");
        run_captured(cmd, JobStage::Separate)
            .await?
            .ensure_success(JobStage::Separate)?;

        Ok(SeparatedStems {
            vocal: vocal_out.to_path_buf(),
            instrumental: inst_out.to_path_buf(),
        })
    }

    async fn convert(
        &self,
        reference: &Path,
        vocal: &Path,
        output: &Path,
        model_id: &str,
        pitch_shift: i32,
    ) -> Result<PathBuf> {
        ensure_parent(output).await?;
        let cmd = self.infer_command(reference, vocal, output, model_id, pitch_shift);
        info!(stage = "infer", model_id, pitch_shift, "Converting vocal");
        run_captured(cmd, JobStage::Infer)
            .await?
            .ensure_success(JobStage::Infer)?;
        Ok(output.to_path_buf())
    }

    async fn mix(&self, vocal: &Path, instrumental: &Path, output: &Path) -> Result<PathBuf> {
        ensure_parent(output).await?;
        let cmd = self.mix_command(vocal, instrumental, output);
        info!(stage = "mix", "Mixing into {}", output.display());
        run_captured(cmd, JobStage::Mix)
            .await?
            .ensure_success(JobStage::Mix)?;
        Ok(output.to_path_buf())
    }
}
