//! Session entity, row mapping and query filters.

use serde::Serialize;
use sqlx::FromRow;
use xraygen_core::session::SessionStatus;
use xraygen_core::types::{DbId, JobId, SessionId, Timestamp};
use xraygen_core::volume::VolumeFormat;

use crate::error::StoreError;

/// A batch session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub owner_id: DbId,
    pub input_volume_key: String,
    pub input_volume_format: VolumeFormat,
    pub status: SessionStatus,
    /// Handle of the most recent render job, for trace correlation.
    pub job_id: Option<JobId>,
    pub archive_key: Option<String>,
    pub created_at: Timestamp,
    /// Set whenever the session leaves `NotStarted`; never cleared.
    pub started_at: Option<Timestamp>,
    /// When a loop claimed the current run. Cleared on queue and revert.
    pub claimed_at: Option<Timestamp>,
}

/// A row from the `sessions` table.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: SessionId,
    pub owner_id: DbId,
    pub input_volume_key: String,
    pub input_volume_format: String,
    pub status: String,
    pub job_id: Option<JobId>,
    pub archive_key: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub claimed_at: Option<Timestamp>,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("session {}: {e}", row.id)))?;
        let input_volume_format = row
            .input_volume_format
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("session {}: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            input_volume_key: row.input_volume_key,
            input_volume_format,
            status,
            job_id: row.job_id,
            archive_key: row.archive_key,
            created_at: row.created_at,
            started_at: row.started_at,
            claimed_at: row.claimed_at,
        })
    }
}

/// DTO for creating a session around an already uploaded volume.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub owner_id: DbId,
    pub input_volume_key: String,
    pub input_volume_format: VolumeFormat,
}

/// Criteria for [`SessionStore::list_sessions`](crate::SessionStore::list_sessions).
///
/// The default filter matches every session except those being deleted.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub owner_id: Option<DbId>,
    /// Restrict to these statuses. `None` means any.
    pub statuses: Option<Vec<SessionStatus>>,
    pub include_deleting: bool,
}

impl SessionFilter {
    pub fn owned_by(owner_id: DbId) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[SessionStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    /// Whether `session` satisfies the filter.
    pub fn matches(&self, session: &Session) -> bool {
        if !self.include_deleting && session.status == SessionStatus::Deleting {
            return false;
        }
        if self.owner_id.is_some_and(|owner| owner != session.owner_id) {
            return false;
        }
        match &self.statuses {
            Some(statuses) => statuses.contains(&session.status),
            None => true,
        }
    }
}

/// An active session that outlived its expected duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckSession {
    pub session: Session,
    pub num_samples: i32,
    pub elapsed: chrono::Duration,
}
