use xraygen_core::storage::BlobError;
use xraygen_core::types::SessionId;
use xraygen_db::StoreError;
use xraygen_renderer::{CodecError, RenderError};

/// Errors that abort a queued job. The runner records them on the job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session {0} has no input parameters")]
    MissingParameters(SessionId),

    #[error("Session {0} disappeared during processing")]
    SessionMissing(SessionId),

    #[error("Render slots closed")]
    RenderSlotsClosed,
}
