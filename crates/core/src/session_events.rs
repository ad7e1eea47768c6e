//! Notification event names and group naming for session progress.
//!
//! Every session event is published to the group of the owning user so
//! that only that user's connected clients receive it.

use crate::types::DbId;

/// A render job picked the session up.
pub const MSG_TYPE_SESSION_STARTED: &str = "session_started";

/// Progress update during the render loop (`progress` in `[0, 1]`).
pub const MSG_TYPE_SESSION_PROGRESS: &str = "session_progress";

/// The render loop ended (processed or cancelled).
pub const MSG_TYPE_SESSION_ENDED: &str = "session_ended";

/// The downloadable archive for a session was (re)built.
pub const MSG_TYPE_ARCHIVE_READY: &str = "archive_ready";

/// The watchdog flagged a session as stuck.
pub const MSG_TYPE_SESSION_STUCK: &str = "session_stuck";

/// Group receiving operational alerts.
pub const STAFF_GROUP: &str = "staff";

/// Notification group for a single user.
pub fn user_group(user_id: DbId) -> String {
    format!("user-{user_id}")
}
