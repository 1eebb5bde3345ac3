//! Cover job service: submission, status, results and cancellation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use super::upload::{Upload, UploadPolicy};
use crate::assets::AssetLayout;
use crate::database::models::{JobStage, JobStatus, JobUpdate, NewCoverJob, NewHistoryEntry};
use crate::database::repositories::{HistoryPage, HistoryRepository, JobRepository};
use crate::domain::{Caller, CoverJob, JobId, PitchShift, TaskHandle};
use crate::queue::TaskQueue;
use crate::{Error, Result};

/// Message recorded on jobs a previous process left running.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by worker restart";

/// A request to generate one cover.
#[derive(Debug, Clone, Default)]
pub struct CoverSubmission {
    pub caller: Caller,
    pub reference_voice: Upload,
    pub song: Upload,
    pub model_id: Option<String>,
    pub pitch_shift: i32,
}

/// What a caller gets back from a submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
    pub task_id: TaskHandle,
    pub status: JobStatus,
    pub stage: JobStage,
}

/// Status snapshot of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: u8,
    pub task_id: Option<String>,
    pub model_id: String,
    pub pitch_shift: i32,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&CoverJob> for JobStatusView {
    fn from(job: &CoverJob) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status,
            stage: job.stage,
            progress: job.progress,
            task_id: job.task_id.as_ref().map(|t| t.as_str().to_string()),
            model_id: job.model_id.clone(),
            pitch_shift: job.pitch_shift,
            error_message: job.error_message.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// The final mix of a succeeded job.
#[derive(Debug, Clone)]
pub struct CoverResult {
    pub path: PathBuf,
    pub filename: String,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Jobs touched by startup recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub failed: usize,
    pub redispatched: usize,
}

/// Engine surface used by callers (CLI, HTTP layer, tests).
pub struct CoverService {
    repo: Arc<dyn JobRepository>,
    layout: AssetLayout,
    queue: Option<Arc<TaskQueue>>,
    policy: UploadPolicy,
    history: Option<Arc<dyn HistoryRepository>>,
}

impl CoverService {
    /// `queue` is `None` when the stage runner is not configured; submissions
    /// are then rejected with `ServiceUnavailable`.
    pub fn new(
        repo: Arc<dyn JobRepository>,
        layout: AssetLayout,
        queue: Option<Arc<TaskQueue>>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            repo,
            layout,
            queue,
            policy,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRepository>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn is_available(&self) -> bool {
        self.queue.is_some()
    }

    pub fn layout(&self) -> &AssetLayout {
        &self.layout
    }

    fn queue(&self) -> Result<&Arc<TaskQueue>> {
        self.queue.as_ref().ok_or_else(|| {
            Error::unavailable(
                "cover runtime is not configured; set GPT_SOVITS_PROJECT_ROOT, \
                 COVER_SEPARATE_SCRIPT and COVER_INFER_SCRIPT",
            )
        })
    }

    /// Validate uploads, create the job and dispatch it.
    pub async fn submit(&self, submission: CoverSubmission) -> Result<SubmittedJob> {
        let queue = self.queue()?;

        let pitch_shift = PitchShift::new(submission.pitch_shift)?;
        let voice_ext = self
            .policy
            .validate("reference_voice", &submission.reference_voice)?;
        let song_ext = self.policy.validate("song", &submission.song)?;

        let job_id = JobId::new();
        let voice_path = self.layout.reference_voice_path(&job_id, &voice_ext);
        let song_path = self.layout.song_path(&job_id, &song_ext);

        let created = async {
            self.layout.create_job_dirs(&job_id).await?;
            write_file(&voice_path, &submission.reference_voice.bytes).await?;
            write_file(&song_path, &submission.song.bytes).await?;

            let mut new_job = NewCoverJob::new(
                job_id.to_string(),
                voice_path.to_string_lossy(),
                song_path.to_string_lossy(),
            )
            .with_model_id(submission.model_id.clone())
            .with_pitch_shift(pitch_shift.semitones());
            if let Some(owner) = submission.caller.user_id() {
                new_job = new_job.with_owner(owner);
            }
            self.repo.create(&new_job).await
        }
        .await;

        if let Err(e) = created {
            error!(job_id = %job_id, "Failed to create cover job: {}", e);
            if let Err(cleanup) = self.layout.remove_job_dir(&job_id).await {
                warn!(job_id = %job_id, "Failed to remove asset directory: {}", cleanup);
            }
            return Err(e);
        }

        let handle = queue.dispatch(job_id);
        let job = self
            .repo
            .update(
                &job_id.to_string(),
                &JobUpdate::new().with_task_id(handle.as_str()),
            )
            .await?;

        info!(job_id = %job_id, task_id = %handle, "Cover job submitted");
        let job = CoverJob::try_from(job)?;
        Ok(SubmittedJob {
            job_id,
            task_id: handle,
            status: job.status,
            stage: job.stage,
        })
    }

    async fn load(&self, job_id: &str, caller: &Caller) -> Result<CoverJob> {
        let id = JobId::parse(job_id)?;
        let job = CoverJob::try_from(self.repo.get(&id.to_string()).await?)?;
        job.ensure_accessible_by(caller)?;
        Ok(job)
    }

    /// Current state of a job.
    pub async fn status(&self, job_id: &str, caller: &Caller) -> Result<CoverJob> {
        self.load(job_id, caller).await
    }

    /// Bytes of the final mix.
    pub async fn result(&self, job_id: &str, caller: &Caller) -> Result<CoverResult> {
        let job = self.load(job_id, caller).await?;
        if job.status != JobStatus::Succeeded {
            return Err(Error::conflict(format!("job status is {}", job.status)));
        }
        let path = job
            .mix_path()
            .cloned()
            .ok_or_else(|| Error::not_found("CoverResult", job.id.to_string()))?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("CoverResult", path.display().to_string()));
            }
            Err(e) => return Err(Error::io_path("reading", &path, e)),
        };

        Ok(CoverResult {
            filename: format!("{}.wav", job.id),
            media_type: "audio/wav",
            path,
            bytes,
        })
    }

    /// Interrupt a job and mark it canceled.
    ///
    /// Canceling a canceled job returns it unchanged; a job that already
    /// succeeded or failed cannot be canceled.
    pub async fn cancel(&self, job_id: &str, caller: &Caller) -> Result<CoverJob> {
        let job = self.load(job_id, caller).await?;
        match job.status {
            JobStatus::Canceled => return Ok(job),
            JobStatus::Succeeded | JobStatus::Failed => {
                return Err(Error::conflict(format!(
                    "job {} already {}",
                    job.id, job.status
                )));
            }
            JobStatus::Queued | JobStatus::Running => {}
        }

        // Persist first so the run observes the cancellation at its next checkpoint.
        let updated = self.repo.cancel(&job.id.to_string()).await?;

        if let (Some(handle), Some(queue)) = (job.task_id.as_ref(), self.queue.as_ref())
            && !queue.cancel(handle)
        {
            info!(job_id = %job.id, task_id = %handle, "Task no longer in flight");
        }

        match updated {
            Some(model) => {
                info!(job_id = %job.id, "Cover job canceled");
                CoverJob::try_from(model)
            }
            None => {
                // Finished between the read and the update.
                let current = CoverJob::try_from(self.repo.get(&job.id.to_string()).await?)?;
                if current.status == JobStatus::Canceled {
                    Ok(current)
                } else {
                    Err(Error::conflict(format!(
                        "job {} already {}",
                        current.id, current.status
                    )))
                }
            }
        }
    }

    /// Resolve jobs left behind by a previous process.
    ///
    /// Running jobs lost their worker and are failed; queued jobs are
    /// dispatched again under a fresh task handle.
    pub async fn recover_jobs(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for job in self.repo.list_by_status(JobStatus::Running).await? {
            let failed = self
                .repo
                .update_active(&job.id, &JobUpdate::failed(INTERRUPTED_MESSAGE))
                .await?;
            if failed.is_some() {
                warn!(job_id = %job.id, stage = %job.stage, "Marked interrupted job as failed");
                report.failed += 1;
                if let Some(history) = &self.history {
                    let entry =
                        NewHistoryEntry::error(&job.id, job.owner_id.clone(), INTERRUPTED_MESSAGE);
                    if let Err(e) = history.record(&entry).await {
                        warn!(job_id = %job.id, "Failed to record history: {}", e);
                    }
                }
            }
        }

        if let Some(queue) = self.queue.as_ref() {
            for job in self.repo.list_by_status(JobStatus::Queued).await? {
                let job_id = match JobId::parse(&job.id) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("Skipping queued job with invalid id {}: {}", job.id, e);
                        continue;
                    }
                };
                let handle = queue.dispatch(job_id);
                self.repo
                    .update(&job.id, &JobUpdate::new().with_task_id(handle.as_str()))
                    .await?;
                info!(job_id = %job_id, task_id = %handle, "Re-dispatched queued job");
                report.redispatched += 1;
            }
        }

        if report != RecoveryReport::default() {
            info!(
                "Startup recovery: {} failed, {} re-dispatched",
                report.failed, report.redispatched
            );
        }
        Ok(report)
    }

    /// Poll until the job reaches a terminal status.
    pub async fn wait_for_completion(
        &self,
        job_id: &JobId,
        poll_interval: Duration,
    ) -> Result<CoverJob> {
        loop {
            let job = CoverJob::try_from(self.repo.get(&job_id.to_string()).await?)?;
            if job.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Finished runs, newest first. `owner = None` lists every owner.
    pub async fn history(
        &self,
        owner: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<HistoryPage> {
        match &self.history {
            Some(history) => history.list(owner, limit, offset).await,
            None => Err(Error::unavailable("cover history is not configured")),
        }
    }

    /// Number of jobs per status.
    pub async fn stats(&self) -> Result<BTreeMap<String, i64>> {
        self.repo.count_by_status().await
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| Error::io_path("writing", path, e))
}
