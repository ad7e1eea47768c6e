//! Job entity models for the session work queue.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sqlx::FromRow;
use xraygen_core::types::{JobId, SessionId, Timestamp};

use super::status::{JobStatus, StatusId};
use crate::error::StoreError;

/// What a queued job does when delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Run the sampling and render loop for a session.
    Render,
    /// Rebuild the session archive from its current output images.
    Archive,
    /// Remove every trace of a session marked `deleting`.
    Delete,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Archive => "archive",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "render" => Ok(Self::Render),
            "archive" => Ok(Self::Archive),
            "delete" => Ok(Self::Delete),
            other => Err(StoreError::Corrupt(format!("unknown job kind '{other}'"))),
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub session_id: SessionId,
    pub status: JobStatus,
    /// Name of the worker holding the delivery, while claimed.
    pub worker: Option<String>,
    /// Number of times the job has been delivered.
    pub attempts: i32,
    pub error_message: Option<String>,
    pub submitted_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub kind: String,
    pub session_id: SessionId,
    pub status_id: StatusId,
    pub worker: Option<String>,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub submitted_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            kind: row.kind.parse()?,
            session_id: row.session_id,
            status: JobStatus::try_from(row.status_id)?,
            worker: row.worker,
            attempts: row.attempts,
            error_message: row.error_message,
            submitted_at: row.submitted_at,
            claimed_at: row.claimed_at,
            completed_at: row.completed_at,
        })
    }
}

/// DTO for enqueueing a job. The id is chosen by the caller so it can be
/// recorded on the session in the same step.
#[derive(Debug, Clone, Copy)]
pub struct NewJob {
    pub id: JobId,
    pub kind: JobKind,
    pub session_id: SessionId,
}

impl NewJob {
    pub fn new(kind: JobKind, session_id: SessionId) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            kind,
            session_id,
        }
    }
}
