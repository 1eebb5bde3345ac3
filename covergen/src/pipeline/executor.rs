//! Pipeline executor for a single cover job.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::config::PipelineConfig;
use super::progress::{Checkpoint, StageReporter};
use crate::assets::AssetLayout;
use crate::database::models::{JobStage, JobStatus, JobUpdate, NewHistoryEntry};
use crate::database::repositories::{HistoryRepository, JobRepository};
use crate::domain::{CoverJob, JobId, JobOutputs};
use crate::runner::StageRunner;
use crate::{Error, Result};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
    /// Canceled before start or at a stage checkpoint.
    Canceled,
    /// The job had already succeeded or failed; nothing was run.
    AlreadyFinished,
}

/// Runs the stage sequence of one job against a [`StageRunner`].
pub struct PipelineExecutor {
    repo: Arc<dyn JobRepository>,
    runner: Arc<dyn StageRunner>,
    layout: AssetLayout,
    config: PipelineConfig,
    history: Option<Arc<dyn HistoryRepository>>,
}

impl PipelineExecutor {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        runner: Arc<dyn StageRunner>,
        layout: AssetLayout,
        config: PipelineConfig,
    ) -> Self {
        Self {
            repo,
            runner,
            layout,
            config,
            history: None,
        }
    }

    /// Record a history entry for every succeeded or failed run.
    pub fn with_history(mut self, history: Arc<dyn HistoryRepository>) -> Self {
        self.history = Some(history);
        self
    }

    /// Run a job to completion.
    ///
    /// Stage failures are recorded on the job and reported as
    /// [`RunOutcome::Failed`]; `Err` is reserved for failures to read or
    /// write the job record itself.
    pub async fn run(&self, job_id: &JobId) -> Result<RunOutcome> {
        let job = CoverJob::try_from(self.repo.get(&job_id.to_string()).await?)?;

        match job.status {
            JobStatus::Canceled => {
                info!(job_id = %job_id, "Job canceled before start, skipping");
                return Ok(RunOutcome::Canceled);
            }
            JobStatus::Succeeded | JobStatus::Failed => {
                warn!(job_id = %job_id, status = %job.status, "Job already finished, ignoring dispatch");
                return Ok(RunOutcome::AlreadyFinished);
            }
            JobStatus::Queued | JobStatus::Running => {}
        }

        let start = Instant::now();
        let mut reporter = StageReporter::new(self.repo.as_ref(), job_id.to_string(), 0);

        match self.execute(&job, &mut reporter).await {
            Ok(Some(outputs)) => {
                let update = JobUpdate::new()
                    .with_status(JobStatus::Succeeded)
                    .with_stage(JobStage::Finalize)
                    .with_progress(100)
                    .with_outputs(
                        outputs.vocal.to_string_lossy(),
                        outputs.instrumental.to_string_lossy(),
                        outputs.mix.to_string_lossy(),
                    )
                    .with_error_message(None);

                match self.repo.update_active(&job_id.to_string(), &update).await? {
                    Some(model) => {
                        self.record_history(NewHistoryEntry::success(model.id, model.owner_id))
                            .await;
                        info!(
                            job_id = %job_id,
                            "Job succeeded in {:.1}s: {}",
                            start.elapsed().as_secs_f64(),
                            outputs.mix.display()
                        );
                        Ok(RunOutcome::Succeeded)
                    }
                    None => {
                        info!(job_id = %job_id, "Job canceled while finalizing");
                        Ok(RunOutcome::Canceled)
                    }
                }
            }
            Ok(None) => Ok(RunOutcome::Canceled),
            Err(e) => {
                error!(
                    job_id = %job_id,
                    progress = reporter.progress(),
                    "Job failed after {:.1}s: {}",
                    start.elapsed().as_secs_f64(),
                    e
                );
                if self.mark_failed(job_id, &e.to_string()).await? {
                    Ok(RunOutcome::Failed)
                } else {
                    Ok(RunOutcome::Canceled)
                }
            }
        }
    }

    /// Persist `(failed, finalize, 100, message)` unless the job was canceled.
    ///
    /// Returns whether the failure was recorded.
    pub async fn mark_failed(&self, job_id: &JobId, message: &str) -> Result<bool> {
        let applied = self
            .repo
            .update_active(&job_id.to_string(), &JobUpdate::failed(message))
            .await?;
        match applied {
            Some(model) => {
                self.record_history(NewHistoryEntry::error(model.id, model.owner_id, message))
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// History is best effort; the job record stays authoritative.
    async fn record_history(&self, entry: NewHistoryEntry) {
        let Some(history) = &self.history else {
            return;
        };
        if let Err(e) = history.record(&entry).await {
            warn!(job_id = %entry.job_id, status = %entry.status, "Failed to record history: {}", e);
        }
    }

    /// Run all stages. `Ok(None)` means a checkpoint observed cancellation.
    async fn execute(
        &self,
        job: &CoverJob,
        reporter: &mut StageReporter<'_>,
    ) -> Result<Option<JobOutputs>> {
        let paths = self.layout.work_paths(&job.id);
        for dir in [self.layout.work_dir(&job.id), self.layout.output_dir(&job.id)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::io_path("creating", &dir, e))?;
        }

        if reporter.report(JobStage::Preprocess).await? == Checkpoint::Canceled {
            return Ok(None);
        }
        let song = self
            .runner
            .normalize(&job.input_song_path, &paths.preprocessed_song)
            .await?;
        require_artifact(&song.path, JobStage::Preprocess, "normalized song").await?;
        debug!(job_id = %job.id, "Song duration {:.2}s", song.duration_secs);
        if song.duration_secs > self.config.max_duration_secs as f64 {
            return Err(Error::DurationExceeded {
                duration_secs: song.duration_secs,
                limit_secs: self.config.max_duration_secs,
            });
        }

        if reporter.report(JobStage::Separate).await? == Checkpoint::Canceled {
            return Ok(None);
        }
        let stems = self
            .runner
            .separate(&song.path, &paths.vocal, &paths.instrumental)
            .await?;
        require_artifact(&stems.vocal, JobStage::Separate, "vocal stem").await?;
        require_artifact(&stems.instrumental, JobStage::Separate, "instrumental stem").await?;

        if reporter.report(JobStage::Infer).await? == Checkpoint::Canceled {
            return Ok(None);
        }
        let converted = self
            .runner
            .convert(
                &job.input_voice_path,
                &stems.vocal,
                &paths.converted_vocal,
                &job.model_id,
                job.pitch_shift,
            )
            .await?;
        require_artifact(&converted, JobStage::Infer, "converted vocal").await?;

        if reporter.report(JobStage::Mix).await? == Checkpoint::Canceled {
            return Ok(None);
        }
        let mix = self
            .runner
            .mix(&converted, &stems.instrumental, &paths.mix)
            .await?;
        require_artifact(&mix, JobStage::Mix, "mix").await?;

        Ok(Some(JobOutputs {
            vocal: stems.vocal,
            instrumental: stems.instrumental,
            mix,
        }))
    }
}

async fn require_artifact(path: &Path, stage: JobStage, what: &str) -> Result<()> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        _ => Err(Error::stage_failed(
            stage.as_str(),
            format!("{} is missing: {}", what, path.display()),
        )),
    }
}
