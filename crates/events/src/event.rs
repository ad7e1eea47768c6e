//! Wire schema of session notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xraygen_core::session::SessionStatus;
use xraygen_core::session_events::{
    MSG_TYPE_ARCHIVE_READY, MSG_TYPE_SESSION_ENDED, MSG_TYPE_SESSION_PROGRESS,
    MSG_TYPE_SESSION_STARTED, MSG_TYPE_SESSION_STUCK,
};
use xraygen_core::types::SessionId;

/// One notification about a session.
///
/// Serializes as
/// `{"type", "session_id", "status", "description", "progress", "timestamp"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub description: String,
    /// Fraction complete, clamped to `[0, 1]`.
    pub progress: f64,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(
        event_type: impl Into<String>,
        session_id: SessionId,
        status: SessionStatus,
        description: impl Into<String>,
        progress: f64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            session_id,
            status,
            description: description.into(),
            progress: clamp_progress(progress),
            timestamp: Utc::now(),
        }
    }

    pub fn started(session_id: SessionId, status: SessionStatus) -> Self {
        Self::new(MSG_TYPE_SESSION_STARTED, session_id, status, "Started", 0.0)
    }

    pub fn progress(
        session_id: SessionId,
        status: SessionStatus,
        fraction: f64,
        description: impl Into<String>,
    ) -> Self {
        Self::new(
            MSG_TYPE_SESSION_PROGRESS,
            session_id,
            status,
            description,
            fraction,
        )
    }

    pub fn ended(session_id: SessionId, status: SessionStatus, progress: f64) -> Self {
        Self::new(
            MSG_TYPE_SESSION_ENDED,
            session_id,
            status,
            status.label(),
            progress,
        )
    }

    pub fn archive_ready(session_id: SessionId, status: SessionStatus) -> Self {
        Self::new(
            MSG_TYPE_ARCHIVE_READY,
            session_id,
            status,
            "Archive ready",
            1.0,
        )
    }

    pub fn stuck(session_id: SessionId, status: SessionStatus, description: impl Into<String>) -> Self {
        Self::new(MSG_TYPE_SESSION_STUCK, session_id, status, description, 0.0)
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}
