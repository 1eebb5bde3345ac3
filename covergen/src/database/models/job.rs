//! Cover job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Default voice model used when a submission does not name one.
pub const DEFAULT_MODEL_ID: &str = "default";

/// Cover job database model (one row of `cover_jobs`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CoverJobDbModel {
    pub id: String,
    pub owner_id: Option<String>,
    /// Status: queued, running, succeeded, failed, canceled
    pub status: String,
    /// Stage: queued, preprocess, separate, infer, mix, finalize
    pub stage: String,
    pub progress: i64,
    /// Opaque task handle assigned at dispatch time
    pub task_id: Option<String>,
    pub model_id: String,
    pub pitch_shift: i64,
    pub input_voice_path: String,
    pub input_song_path: String,
    pub output_vocal_path: Option<String>,
    pub output_inst_path: Option<String>,
    pub output_mix_path: Option<String>,
    pub error_message: Option<String>,
    /// Unix epoch milliseconds
    pub created_at: i64,
    /// Unix epoch milliseconds
    pub updated_at: i64,
}

/// Cover job status values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created and dispatched, waiting for a worker.
    Queued,
    /// A worker is driving the pipeline.
    Running,
    /// All stages finished and the mix exists.
    Succeeded,
    /// A stage failed or the run was killed by the time limit.
    Failed,
    /// Canceled by the caller.
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub const TERMINAL: [JobStatus; 3] = [Self::Succeeded, Self::Failed, Self::Canceled];
}

/// Pipeline stages, in execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Preprocess,
    Separate,
    Infer,
    Mix,
    Finalize,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Preprocess => "preprocess",
            Self::Separate => "separate",
            Self::Infer => "infer",
            Self::Mix => "mix",
            Self::Finalize => "finalize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "preprocess" => Some(Self::Preprocess),
            "separate" => Some(Self::Separate),
            "infer" => Some(Self::Infer),
            "mix" => Some(Self::Mix),
            "finalize" => Some(Self::Finalize),
            _ => None,
        }
    }

    /// Progress checkpoint reported when the stage starts.
    pub fn checkpoint(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Preprocess => 5,
            Self::Separate => 35,
            Self::Infer => 70,
            Self::Mix => 90,
            Self::Finalize => 100,
        }
    }
}

/// Fields required to insert a new cover job.
#[derive(Debug, Clone)]
pub struct NewCoverJob {
    pub id: String,
    pub owner_id: Option<String>,
    pub input_voice_path: String,
    pub input_song_path: String,
    pub model_id: Option<String>,
    pub pitch_shift: i32,
}

impl NewCoverJob {
    pub fn new(
        id: impl Into<String>,
        input_voice_path: impl Into<String>,
        input_song_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: None,
            input_voice_path: input_voice_path.into(),
            input_song_path: input_song_path.into(),
            model_id: None,
            pitch_shift: 0,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_model_id(mut self, model_id: Option<String>) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn with_pitch_shift(mut self, pitch_shift: i32) -> Self {
        self.pitch_shift = pitch_shift;
        self
    }

    /// Model id persisted for this job, falling back to [`DEFAULT_MODEL_ID`].
    pub fn effective_model_id(&self) -> &str {
        match self.model_id.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m,
            _ => DEFAULT_MODEL_ID,
        }
    }
}

/// Partial update of a cover job. Only `Some` fields are written.
///
/// `error_message` is tri-state: `None` leaves it untouched, `Some(None)`
/// clears it and `Some(Some(msg))` sets it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub stage: Option<JobStage>,
    pub progress: Option<i64>,
    pub task_id: Option<String>,
    pub output_vocal_path: Option<String>,
    pub output_inst_path: Option<String>,
    pub output_mix_path: Option<String>,
    pub error_message: Option<Option<String>>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(running, stage, progress)` as persisted by every progress report.
    pub fn progress(stage: JobStage, progress: u8) -> Self {
        Self::new()
            .with_status(JobStatus::Running)
            .with_stage(stage)
            .with_progress(i64::from(progress))
    }

    /// Terminal failure: `(failed, finalize, 100, message)`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new()
            .with_status(JobStatus::Failed)
            .with_stage(JobStage::Finalize)
            .with_progress(100)
            .with_error_message(Some(message.into()))
    }

    /// Forced cancellation: `(canceled, finalize, 100)`.
    pub fn canceled() -> Self {
        Self::new()
            .with_status(JobStatus::Canceled)
            .with_stage(JobStage::Finalize)
            .with_progress(100)
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stage(mut self, stage: JobStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_outputs(
        mut self,
        vocal: impl Into<String>,
        instrumental: impl Into<String>,
        mix: impl Into<String>,
    ) -> Self {
        self.output_vocal_path = Some(vocal.into());
        self.output_inst_path = Some(instrumental.into());
        self.output_mix_path = Some(mix.into());
        self
    }

    pub fn with_error_message(mut self, message: Option<String>) -> Self {
        self.error_message = Some(message);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
