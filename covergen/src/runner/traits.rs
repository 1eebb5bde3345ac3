//! Stage runner trait and related types.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;

/// A song normalized for the rest of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSong {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// Vocal and instrumental stems produced by separation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatedStems {
    pub vocal: PathBuf,
    pub instrumental: PathBuf,
}

/// External processing steps of the cover pipeline.
///
/// Each call either produces the requested output or fails with
/// [`crate::Error::StageFailed`]. Dropping the returned future must stop the
/// underlying work.
///
/// Implementations report how the step ran; the pipeline executor checks
/// every returned path exists before moving on, for any runner.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Convert `input` to 44.1 kHz stereo pcm_s16le WAV at `output` and probe its duration.
    async fn normalize(&self, input: &Path, output: &Path) -> Result<NormalizedSong>;

    /// Split `song` into vocal and instrumental stems.
    async fn separate(&self, song: &Path, vocal_out: &Path, inst_out: &Path)
    -> Result<SeparatedStems>;

    /// Re-sing `vocal` in the voice of `reference`.
    async fn convert(
        &self,
        reference: &Path,
        vocal: &Path,
        output: &Path,
        model_id: &str,
        pitch_shift: i32,
    ) -> Result<PathBuf>;

    /// Mix the converted vocal over the instrumental.
    async fn mix(&self, vocal: &Path, instrumental: &Path, output: &Path) -> Result<PathBuf>;
}
