use xraygen_core::error::CoreError;
use xraygen_core::types::SessionId;

/// Errors from the session store and job queue.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// A transition guard rejected the operation. Nothing was written.
    #[error(transparent)]
    Rejected(#[from] CoreError),

    /// A row could not be mapped back into a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(inner) => inner,
            StoreError::SessionNotFound(id) => CoreError::not_found("Session", id),
            other => CoreError::Internal(other.to_string()),
        }
    }
}
