//! Job identifier value object.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// A cover job identifier: a UUID v4 in canonical lowercase hyphenated form.
///
/// The same string names the job's asset directory, so parsing is strict:
/// braced, URN, simple or uppercase forms are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a canonical identifier.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let uuid = Uuid::try_parse(s)
            .map_err(|_| Error::validation(format!("invalid job id: {s:?}")))?;
        if uuid.hyphenated().to_string() != s {
            return Err(Error::validation(format!(
                "job id must be a lowercase hyphenated UUID: {s:?}"
            )));
        }
        Ok(Self(uuid))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
