/// User primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Sessions are keyed by an opaque UUID.
pub type SessionId = uuid::Uuid;

/// Job handles correlate a queued job with the session it renders.
pub type JobId = uuid::Uuid;

/// The caller of a session use case.
///
/// Authentication happens upstream; by the time a request reaches the
/// session core it carries a resolved user id and the staff flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: DbId,
    /// Staff may delete any session and are exempt from the session quota.
    pub is_staff: bool,
}

impl Actor {
    pub fn user(user_id: DbId) -> Self {
        Self {
            user_id,
            is_staff: false,
        }
    }

    pub fn staff(user_id: DbId) -> Self {
        Self {
            user_id,
            is_staff: true,
        }
    }
}
