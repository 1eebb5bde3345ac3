//! Stage progress reporting with cancellation checkpoints.

use tracing::{debug, info};

use crate::Result;
use crate::database::models::{JobStage, JobUpdate};
use crate::database::repositories::JobRepository;

/// Outcome of a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// The transition was persisted; keep going.
    Continue,
    /// The job was canceled concurrently; stop without touching it again.
    Canceled,
}

/// Persists `(running, stage, progress)` for one job run.
///
/// Progress never goes backwards within a run, and every report doubles as
/// a cancellation checkpoint.
pub struct StageReporter<'a> {
    repo: &'a dyn JobRepository,
    job_id: String,
    progress: u8,
}

impl<'a> StageReporter<'a> {
    pub fn new(repo: &'a dyn JobRepository, job_id: impl Into<String>, progress: u8) -> Self {
        Self {
            repo,
            job_id: job_id.into(),
            progress,
        }
    }

    /// Progress last persisted by this reporter.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub async fn report(&mut self, stage: JobStage) -> Result<Checkpoint> {
        let progress = self.progress.max(stage.checkpoint());
        let update = JobUpdate::progress(stage, progress);

        match self.repo.update_active(&self.job_id, &update).await? {
            Some(_) => {
                self.progress = progress;
                info!(job_id = %self.job_id, stage = %stage, progress, "Job stage started");
                Ok(Checkpoint::Continue)
            }
            None => {
                debug!(job_id = %self.job_id, stage = %stage, "Job canceled, stopping at checkpoint");
                Ok(Checkpoint::Canceled)
            }
        }
    }
}
