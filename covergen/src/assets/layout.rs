//! On-disk layout of job asset directories.

use std::path::{Path, PathBuf};

use crate::domain::JobId;
use crate::{Error, Result};

pub const INPUT_DIR: &str = "input";
pub const WORK_DIR: &str = "work";
pub const OUTPUT_DIR: &str = "output";

/// Artifact paths written while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    pub preprocessed_song: PathBuf,
    pub vocal: PathBuf,
    pub instrumental: PathBuf,
    pub converted_vocal: PathBuf,
    pub mix: PathBuf,
}

/// `<root>/<job_id>/{input,work,output}`; each directory belongs to one job.
#[derive(Debug, Clone)]
pub struct AssetLayout {
    root: PathBuf,
}

impl AssetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn input_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(INPUT_DIR)
    }

    pub fn work_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(WORK_DIR)
    }

    pub fn output_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(OUTPUT_DIR)
    }

    /// `input/reference_voice<ext>`; `ext` includes the leading dot.
    pub fn reference_voice_path(&self, id: &JobId, ext: &str) -> PathBuf {
        self.input_dir(id).join(format!("reference_voice{ext}"))
    }

    /// `input/song<ext>`; `ext` includes the leading dot.
    pub fn song_path(&self, id: &JobId, ext: &str) -> PathBuf {
        self.input_dir(id).join(format!("song{ext}"))
    }

    pub fn work_paths(&self, id: &JobId) -> WorkPaths {
        let work = self.work_dir(id);
        WorkPaths {
            preprocessed_song: work.join("song_preprocessed.wav"),
            vocal: work.join("vocal.wav"),
            instrumental: work.join("instrumental.wav"),
            converted_vocal: work.join("converted_vocal.wav"),
            mix: self.output_dir(id).join("final.wav"),
        }
    }

    /// Create `input/`, `work/` and `output/` for a job.
    pub async fn create_job_dirs(&self, id: &JobId) -> Result<PathBuf> {
        for dir in [self.input_dir(id), self.work_dir(id), self.output_dir(id)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::io_path("creating", &dir, e))?;
        }
        Ok(self.job_dir(id))
    }

    /// Remove a job's directory tree; a missing directory is not an error.
    pub async fn remove_job_dir(&self, id: &JobId) -> Result<()> {
        let dir = self.job_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_path("removing", &dir, e)),
        }
    }
}
