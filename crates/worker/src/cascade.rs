//! Output purging and the explicit session delete cascade.

use xraygen_core::session::SessionStatus;
use xraygen_core::types::SessionId;
use xraygen_db::models::job::Job;
use xraygen_db::models::output_image::OutputImage;

use crate::context::PipelineContext;
use crate::error::JobError;

/// Delete every output image of a session: rows first, then blobs.
///
/// Blob deletion failures are logged and skipped; the rows are already
/// gone so the images are unreachable either way. Returns the number of
/// images removed.
pub async fn purge_output_images(
    ctx: &PipelineContext,
    session_id: SessionId,
) -> Result<usize, JobError> {
    let removed = ctx.store.delete_output_images(session_id).await?;
    delete_image_blobs(ctx, session_id, &removed).await;
    Ok(removed.len())
}

async fn delete_image_blobs(ctx: &PipelineContext, session_id: SessionId, images: &[OutputImage]) {
    for image in images {
        for key in [&image.image_key, &image.thumbnail_key] {
            if let Err(e) = ctx.blobs.delete(key).await {
                tracing::warn!(%session_id, key = %key, error = %e, "Failed to delete output blob");
            }
        }
    }
}

/// Outcome of a delete job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { images: usize },
    /// The session was already gone.
    AlreadyDeleted,
    /// The session is not marked for deletion; nothing was touched.
    NotMarked(SessionStatus),
}

/// Handles delete jobs enqueued by the staff delete use case.
#[derive(Clone)]
pub struct CascadeDeleter {
    ctx: PipelineContext,
}

impl CascadeDeleter {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Remove a `deleting` session with its parameters, output images and
    /// archive. The input volume stays: other sessions may reference the
    /// same upload.
    pub async fn handle_delete(&self, job: &Job) -> Result<DeleteOutcome, JobError> {
        let session_id = job.session_id;
        let Some(session) = self.ctx.store.find_session(session_id).await? else {
            tracing::info!(%session_id, job_id = %job.id, "Session already deleted");
            return Ok(DeleteOutcome::AlreadyDeleted);
        };
        if session.status != SessionStatus::Deleting {
            tracing::warn!(
                %session_id,
                status = %session.status,
                "Delete job for session not marked deleting; skipping",
            );
            return Ok(DeleteOutcome::NotMarked(session.status));
        }

        let images = purge_output_images(&self.ctx, session_id).await?;

        if let Some(archive_key) = self.ctx.store.swap_archive(session_id, None).await? {
            self.ctx.blobs.delete(&archive_key).await?;
        }
        // A render loop may have stored a sample after the purge.
        let late = self
            .ctx
            .store
            .delete_session(session_id)
            .await?
            .unwrap_or_default();
        delete_image_blobs(&self.ctx, session_id, &late).await;
        let images = images + late.len();

        tracing::info!(%session_id, images, "Session deleted");
        Ok(DeleteOutcome::Deleted { images })
    }
}
