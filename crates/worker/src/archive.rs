//! Zip bundles of a session's output images.
//!
//! Each build writes a new archive under a fresh versioned key, swaps the
//! session's archive reference, then deletes the previous bundle. Readers
//! therefore always see either the old or the new archive, never a
//! partially written one.

use std::io::{Cursor, Write};

use xraygen_core::blob_keys;
use xraygen_core::session::SessionStatus;
use xraygen_core::types::SessionId;
use xraygen_db::models::job::Job;
use xraygen_events::SessionEvent;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::context::PipelineContext;
use crate::error::JobError;

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub archive_key: String,
    pub entries: usize,
}

#[derive(Clone)]
pub struct ArtifactArchiver {
    ctx: PipelineContext,
}

impl ArtifactArchiver {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Queue entry point. Sessions that are gone or being deleted are
    /// skipped.
    pub async fn handle_archive(&self, job: &Job) -> Result<Option<ArchiveSummary>, JobError> {
        match self.ctx.store.current_status(job.session_id).await? {
            None | Some(SessionStatus::Deleting) => {
                tracing::info!(session_id = %job.session_id, "Archive skipped; session gone");
                Ok(None)
            }
            Some(_) => self.build(job.session_id).await.map(Some),
        }
    }

    /// Rebuild the archive from the session's current output images.
    ///
    /// Safe to run repeatedly. On failure the session status, its outputs
    /// and its current archive are untouched.
    pub async fn build(&self, session_id: SessionId) -> Result<ArchiveSummary, JobError> {
        let session = self
            .ctx
            .store
            .find_session(session_id)
            .await?
            .ok_or(JobError::SessionMissing(session_id))?;
        let images = self.ctx.store.list_output_images(session_id).await?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for image in &images {
            let bytes = self.ctx.blobs.get(&image.image_key).await?;
            writer.start_file(
                blob_keys::archive_entry_name(image.sample_index as usize),
                options,
            )?;
            writer.write_all(&bytes)?;
        }
        let bundle = writer.finish()?.into_inner();

        let archive_key = blob_keys::archive_key(session_id, uuid::Uuid::now_v7());
        self.ctx.blobs.put(&archive_key, bundle).await?;

        let previous = match self.ctx.store.swap_archive(session_id, Some(&archive_key)).await {
            Ok(previous) => previous,
            Err(e) => {
                if let Err(cleanup) = self.ctx.blobs.delete(&archive_key).await {
                    tracing::warn!(%session_id, error = %cleanup, "Failed to remove orphaned archive");
                }
                return Err(e.into());
            }
        };
        if let Some(previous) = previous.filter(|p| *p != archive_key) {
            if let Err(e) = self.ctx.blobs.delete(&previous).await {
                tracing::warn!(%session_id, key = %previous, error = %e, "Failed to delete previous archive");
            }
        }

        let status = self
            .ctx
            .store
            .current_status(session_id)
            .await?
            .unwrap_or(session.status);
        self.ctx
            .notify_owner(session.owner_id, SessionEvent::archive_ready(session_id, status));
        tracing::info!(%session_id, entries = images.len(), key = %archive_key, "Archive built");

        Ok(ArchiveSummary {
            archive_key,
            entries: images.len(),
        })
    }
}
