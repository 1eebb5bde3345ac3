//! Upload validation for cover submissions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Extension used when an upload carries no usable one.
pub const DEFAULT_EXTENSION: &str = ".wav";

/// An uploaded audio file.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Self::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Lowercased extension of the filename without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        self.filename
            .as_deref()
            .and_then(|f| Path::new(f).extension())
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(str::to_ascii_lowercase)
    }
}

/// What uploads are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Accepted extensions, without the dot.
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_allowed_formats() -> Vec<String> {
    ["wav", "mp3", "flac", "ogg", "m4a", "aac"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_formats: default_allowed_formats(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl UploadPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_formats = formats
            .into_iter()
            .map(|f| f.into().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    fn is_allowed(&self, ext: &str) -> bool {
        self.allowed_formats
            .iter()
            .any(|f| f.eq_ignore_ascii_case(ext))
    }

    /// Validate `upload` and return the extension (with dot) to store it under.
    pub fn validate(&self, field: &str, upload: &Upload) -> Result<String> {
        if let Some(content_type) = upload.content_type.as_deref().filter(|c| !c.is_empty())
            && !content_type.to_ascii_lowercase().starts_with("audio/")
        {
            return Err(Error::validation(format!(
                "{}: invalid file type {}, expected audio/*",
                field, content_type
            )));
        }

        let ext = upload.extension();
        if let Some(ext) = ext.as_deref()
            && !self.is_allowed(ext)
        {
            return Err(Error::validation(format!(
                "{}: unsupported file format .{}",
                field, ext
            )));
        }

        if upload.bytes.is_empty() {
            return Err(Error::validation(format!("{}: file is empty", field)));
        }
        if upload.bytes.len() as u64 > self.max_upload_bytes {
            return Err(Error::validation(format!(
                "{}: file exceeds the {} byte upload limit",
                field, self.max_upload_bytes
            )));
        }

        Ok(ext
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_allowed_audio() {
        let policy = UploadPolicy::default();
        let upload = Upload::new(vec![1u8; 16])
            .with_filename("Song.MP3")
            .with_content_type("audio/mpeg");
        assert_eq!(policy.validate("song", &upload).unwrap(), ".mp3");
    }

    #[test]
    fn test_missing_extension_defaults_to_wav() {
        let policy = UploadPolicy::default();
        assert_eq!(
            policy.validate("song", &Upload::new(vec![1u8])).unwrap(),
            ".wav"
        );
        let upload = Upload::new(vec![1u8]).with_filename("recording");
        assert_eq!(policy.validate("song", &upload).unwrap(), ".wav");
    }

    #[test]
    fn test_rejects_bad_uploads() {
        let policy = UploadPolicy::default().with_max_upload_bytes(8);

        let not_audio = Upload::new(vec![1u8]).with_content_type("video/mp4");
        assert!(matches!(
            policy.validate("song", &not_audio),
            Err(Error::Validation(_))
        ));

        let bad_ext = Upload::new(vec![1u8]).with_filename("notes.txt");
        assert!(policy.validate("song", &bad_ext).is_err());

        assert!(policy.validate("song", &Upload::new(Vec::new())).is_err());
        assert!(policy.validate("song", &Upload::new(vec![0u8; 9])).is_err());
    }

    #[test]
    fn test_allowed_formats_are_normalized() {
        let policy = UploadPolicy::new().with_allowed_formats([" .WAV", "flac", ""]);
        assert_eq!(policy.allowed_formats, ["wav", "flac"]);
        let upload = Upload::new(vec![1u8]).with_filename("a.wav");
        assert!(policy.validate("song", &upload).is_ok());
    }
}
