//! Cover job entity.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::{CoverJobDbModel, JobStage, JobStatus};
use crate::database::time::ms_to_datetime;
use crate::domain::{JobId, TaskHandle};
use crate::Error;

/// Paths of the artifacts a succeeded job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutputs {
    pub vocal: PathBuf,
    pub instrumental: PathBuf,
    pub mix: PathBuf,
}

/// Cover job entity, typed view of a `cover_jobs` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverJob {
    pub id: JobId,
    pub owner_id: Option<String>,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: u8,
    pub task_id: Option<TaskHandle>,
    pub model_id: String,
    pub pitch_shift: i32,
    pub input_voice_path: PathBuf,
    pub input_song_path: PathBuf,
    pub outputs: Option<JobOutputs>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoverJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mix_path(&self) -> Option<&PathBuf> {
        self.outputs.as_ref().map(|o| &o.mix)
    }

    /// Jobs with an owner are only visible to that owner.
    pub fn ensure_accessible_by(&self, caller: &Caller) -> Result<(), Error> {
        match (&self.owner_id, caller.user_id()) {
            (None, _) => Ok(()),
            (Some(owner), Some(user)) if owner == user => Ok(()),
            _ => Err(Error::forbidden(format!(
                "cover job {} belongs to another user",
                self.id
            ))),
        }
    }
}

impl TryFrom<CoverJobDbModel> for CoverJob {
    type Error = Error;

    fn try_from(model: CoverJobDbModel) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&model.status).ok_or_else(|| {
            Error::Database(format!("job {} has unknown status {:?}", model.id, model.status))
        })?;
        let stage = JobStage::parse(&model.stage).ok_or_else(|| {
            Error::Database(format!("job {} has unknown stage {:?}", model.id, model.stage))
        })?;

        let outputs = match (
            model.output_vocal_path,
            model.output_inst_path,
            model.output_mix_path,
        ) {
            (Some(vocal), Some(instrumental), Some(mix)) => Some(JobOutputs {
                vocal: vocal.into(),
                instrumental: instrumental.into(),
                mix: mix.into(),
            }),
            _ => None,
        };

        Ok(Self {
            id: JobId::parse(&model.id)?,
            owner_id: model.owner_id,
            status,
            stage,
            progress: model.progress.clamp(0, 100) as u8,
            task_id: model.task_id.map(TaskHandle::from_trusted),
            model_id: model.model_id,
            pitch_shift: model.pitch_shift as i32,
            input_voice_path: model.input_voice_path.into(),
            input_song_path: model.input_song_path.into(),
            outputs,
            error_message: model.error_message,
            created_at: ms_to_datetime(model.created_at),
            updated_at: ms_to_datetime(model.updated_at),
        })
    }
}

/// Identity of whoever is asking about a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    user_id: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> CoverJobDbModel {
        CoverJobDbModel {
            id: id.to_string(),
            owner_id: Some("owner-1".to_string()),
            status: "succeeded".to_string(),
            stage: "finalize".to_string(),
            progress: 100,
            task_id: Some("task".to_string()),
            model_id: "default".to_string(),
            pitch_shift: 2,
            input_voice_path: "/x/input/reference_voice.wav".to_string(),
            input_song_path: "/x/input/song.wav".to_string(),
            output_vocal_path: Some("/x/work/converted_vocal.wav".to_string()),
            output_inst_path: Some("/x/work/instrumental.wav".to_string()),
            output_mix_path: Some("/x/output/final.wav".to_string()),
            error_message: None,
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_360_000,
        }
    }

    #[test]
    fn test_from_db_model() {
        let id = JobId::new().to_string();
        let job = CoverJob::try_from(model(&id)).unwrap();
        assert_eq!(job.id.to_string(), id);
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.stage, JobStage::Finalize);
        assert_eq!(job.mix_path(), Some(&PathBuf::from("/x/output/final.wav")));
        assert_eq!(job.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(job.task_id.as_ref().map(TaskHandle::as_str), Some("task"));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let mut m = model(&JobId::new().to_string());
        m.status = "paused".to_string();
        assert!(CoverJob::try_from(m).is_err());
    }

    #[test]
    fn test_ownership() {
        let mut job = CoverJob::try_from(model(&JobId::new().to_string())).unwrap();
        assert!(job.ensure_accessible_by(&Caller::user("owner-1")).is_ok());
        assert!(matches!(
            job.ensure_accessible_by(&Caller::user("someone-else")),
            Err(Error::Forbidden(_))
        ));
        assert!(job.ensure_accessible_by(&Caller::anonymous()).is_err());

        job.owner_id = None;
        assert!(job.ensure_accessible_by(&Caller::anonymous()).is_ok());
        assert!(job.ensure_accessible_by(&Caller::user("anyone")).is_ok());
    }
}
