//! Session lifecycle statuses and the rules for moving between them.
//!
//! The rules are pure functions over the current status so that every
//! store implementation (Postgres, in-memory) applies them identically
//! inside its own critical section.
//!
//! ```text
//! NotStarted --initiate--> Queued --claim--> Running --finish--> Processed
//!                            |                 |
//!                            +-----cancel------+--> Cancelled --revert--> NotStarted
//! any --delete--> Deleting --> (removed)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Status of a batch session. Stored as its kebab-case wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    NotStarted,
    Queued,
    Running,
    Processed,
    /// Cancellation requested; the running job observes it at the next
    /// sample boundary and reverts the session to `NotStarted`.
    Cancelled,
    Deleting,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        Self::NotStarted,
        Self::Queued,
        Self::Running,
        Self::Processed,
        Self::Cancelled,
        Self::Deleting,
    ];

    /// Statuses in which a job is (or should be) doing work for the session.
    pub const ACTIVE: [SessionStatus; 3] = [Self::Queued, Self::Running, Self::Cancelled];

    /// Database and wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Processed => "processed",
            Self::Cancelled => "cancelled",
            Self::Deleting => "deleting",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Processed => "Processed",
            Self::Cancelled => "Cancelling",
            Self::Deleting => "Deleting",
        }
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown session status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Transition outcomes
// ---------------------------------------------------------------------------

/// Result of a worker attempting to claim a queued session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// `Queued -> Running` happened; this delivery owns the render loop.
    Claimed,
    /// Another delivery already claimed (or finished) the session.
    NotClaimable(SessionStatus),
    /// The owner cancelled before any worker picked the job up. The
    /// session has been reverted to `NotStarted`.
    CancelledBeforeStart,
    /// The session no longer exists.
    Missing,
}

/// Result of the render loop trying to mark a session `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    Processed,
    /// Cancellation arrived after the final sample; the caller runs the
    /// cancellation path instead.
    CancelRequested,
    /// The session was moved elsewhere (deleted, or reverted by hand).
    Unexpected(SessionStatus),
}

/// Result of an owner asking to cancel a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The flag is set; the job will stop at the next sample boundary.
    Requested,
    /// Nothing is running, so there is nothing to cancel.
    NotCancellable(SessionStatus),
}

/// What the claim critical section should do for a session in `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimAction {
    MarkRunning,
    RevertToNotStarted,
    NoOp,
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Check whether a session may be initiated (`NotStarted -> Queued`).
pub fn check_initiate(status: SessionStatus, has_parameters: bool) -> Result<(), CoreError> {
    if !has_parameters {
        return Err(CoreError::Validation("Parameters missing".into()));
    }
    if status != SessionStatus::NotStarted {
        return Err(CoreError::Conflict(format!(
            "Invalid start state '{status}'; session must be '{}'",
            SessionStatus::NotStarted
        )));
    }
    Ok(())
}

/// Decide how a claim attempt treats a session in `status`.
///
/// `claimed` is whether a loop already took the session for this run. A
/// cancelled session that was never claimed reverts here; once a loop owns
/// it, only that loop may purge its outputs and revert it.
pub fn claim_action(status: SessionStatus, claimed: bool) -> ClaimAction {
    match (status, claimed) {
        (SessionStatus::Queued, _) => ClaimAction::MarkRunning,
        (SessionStatus::Cancelled, false) => ClaimAction::RevertToNotStarted,
        _ => ClaimAction::NoOp,
    }
}

/// Cancellation is only meaningful while a job is pending or running.
pub fn can_request_cancel(status: SessionStatus) -> bool {
    matches!(status, SessionStatus::Queued | SessionStatus::Running)
}

/// Decide how a finish attempt treats a session in `status`.
pub fn finish_outcome(status: SessionStatus) -> FinishOutcome {
    match status {
        SessionStatus::Running => FinishOutcome::Processed,
        SessionStatus::Cancelled => FinishOutcome::CancelRequested,
        other => FinishOutcome::Unexpected(other),
    }
}

/// Parameters are editable only before the first run starts.
pub fn check_parameters_editable(status: SessionStatus) -> Result<(), CoreError> {
    if status == SessionStatus::NotStarted {
        Ok(())
    } else {
        Err(CoreError::Conflict(format!(
            "Parameters cannot be changed while session is '{status}'"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
