//! Cover history database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Cover history database model (one row of `cover_history`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CoverHistoryDbModel {
    pub id: i64,
    pub job_id: String,
    /// `None` for anonymous jobs
    pub owner_id: Option<String>,
    /// Status: success, error
    pub status: String,
    pub error_message: Option<String>,
    /// Unix epoch milliseconds
    pub created_at: i64,
}

/// Outcome recorded in the history.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Error,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Parameters for inserting a history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub job_id: String,
    pub owner_id: Option<String>,
    pub status: HistoryStatus,
    pub error_message: Option<String>,
}

impl NewHistoryEntry {
    pub fn success(job_id: impl Into<String>, owner_id: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            owner_id,
            status: HistoryStatus::Success,
            error_message: None,
        }
    }

    pub fn error(
        job_id: impl Into<String>,
        owner_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            owner_id,
            status: HistoryStatus::Error,
            error_message: Some(message.into()),
        }
    }
}
