//! The render loop.
//!
//! [`JobDispatcher::handle_render`] runs once per delivered render job:
//! claim the session, sample the pose sequence, render and store each
//! view, then finalize. Cancellation is cooperative and observed once per
//! sample. The render context is released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Semaphore;
use xraygen_core::blob_keys;
use xraygen_core::parameters::InputParameters;
use xraygen_core::sampler::ParameterSampler;
use xraygen_core::session::{ClaimOutcome, FinishOutcome, SessionStatus};
use xraygen_core::types::SessionId;
use xraygen_db::models::job::{Job, JobKind, NewJob};
use xraygen_db::models::output_image::NewOutputImage;
use xraygen_db::models::session::Session;
use xraygen_events::SessionEvent;
use xraygen_renderer::{ImageCodec, ProjectionRenderer, RendererFactory, VolumeLoader};

use crate::cascade::purge_output_images;
use crate::context::PipelineContext;
use crate::error::JobError;
use crate::progress::{ProgressReporter, DEFAULT_MIN_INTERVAL};

/// How a render job ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// All samples rendered; the session is `processed`.
    Completed { images: usize },
    /// Cancellation was observed; partial outputs were purged and the
    /// session is back to `not-started`.
    Cancelled { purged: usize },
    /// The claim did not take: duplicate delivery, a queued cancel, or a
    /// missing session. Nothing was rendered.
    Skipped(ClaimOutcome),
    /// The session left `running` for something other than a cancel
    /// (e.g. it is being deleted). The loop stopped without finalizing and
    /// purged its outputs if the session is `not-started` again.
    Abandoned(SessionStatus),
}

enum LoopEnd {
    Completed(usize),
    Interrupted(SessionStatus),
}

pub struct JobDispatcher {
    ctx: PipelineContext,
    loader: Arc<dyn VolumeLoader>,
    renderers: Arc<dyn RendererFactory>,
    codec: Arc<dyn ImageCodec>,
    render_slots: Arc<Semaphore>,
    progress_interval: Duration,
    rng_seed: Option<u64>,
}

impl JobDispatcher {
    /// `render_slots` bounds concurrently live render contexts across the
    /// whole process.
    pub fn new(
        ctx: PipelineContext,
        loader: Arc<dyn VolumeLoader>,
        renderers: Arc<dyn RendererFactory>,
        codec: Arc<dyn ImageCodec>,
        render_slots: Arc<Semaphore>,
    ) -> Self {
        Self {
            ctx,
            loader,
            renderers,
            codec,
            render_slots,
            progress_interval: DEFAULT_MIN_INTERVAL,
            rng_seed: None,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Seed pose sampling so every run draws the same sequence.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Run the render job for `job.session_id`.
    ///
    /// Errors leave the session `running`; the stuck-job sweep reports it.
    pub async fn handle_render(&self, job: &Job) -> Result<RenderOutcome, JobError> {
        let session_id = job.session_id;

        match self.ctx.store.claim_session(session_id).await? {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::CancelledBeforeStart => {
                tracing::info!(%session_id, job_id = %job.id, "Session cancelled before start");
                if let Some(session) = self.ctx.store.find_session(session_id).await? {
                    self.ctx.notify_owner(
                        session.owner_id,
                        SessionEvent::ended(session_id, SessionStatus::NotStarted, 0.0),
                    );
                }
                return Ok(RenderOutcome::Skipped(ClaimOutcome::CancelledBeforeStart));
            }
            other => {
                tracing::info!(
                    %session_id,
                    job_id = %job.id,
                    outcome = ?other,
                    "Duplicate or stale delivery; nothing to do",
                );
                return Ok(RenderOutcome::Skipped(other));
            }
        }

        let session = self
            .ctx
            .store
            .find_session(session_id)
            .await?
            .ok_or(JobError::SessionMissing(session_id))?;

        let result = self.run_claimed(&session).await;
        if let Err(e) = &result {
            tracing::error!(%session_id, job_id = %job.id, error = %e, "Render job failed");
        }
        result
    }

    async fn run_claimed(&self, session: &Session) -> Result<RenderOutcome, JobError> {
        let session_id = session.id;
        let params = self
            .ctx
            .store
            .find_parameters(session_id)
            .await?
            .ok_or(JobError::MissingParameters(session_id))?;

        let mut progress = ProgressReporter::new(
            self.ctx.notifier.clone(),
            session.owner_id,
            session_id,
            self.progress_interval,
        );
        progress.begin();

        let bytes = self.ctx.blobs.get(&session.input_volume_key).await?;
        let volume = self
            .loader
            .load(bytes, session.input_volume_format)
            .await?;

        let permit = self
            .render_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobError::RenderSlotsClosed)?;
        let mut renderer = self
            .renderers
            .create(Arc::new(volume), params.geometry())
            .await?;

        let result = self
            .render_samples(session, &params, renderer.as_mut(), &mut progress)
            .await;

        if let Err(e) = renderer.release().await {
            tracing::warn!(%session_id, error = %e, "Render context release failed");
        }
        drop(permit);

        match result? {
            LoopEnd::Completed(images) => self.finalize(session, images, &mut progress).await,
            LoopEnd::Interrupted(SessionStatus::Cancelled) => {
                self.cancel(session_id, &mut progress).await
            }
            LoopEnd::Interrupted(status) => self.abandon(session_id, status).await,
        }
    }

    async fn render_samples(
        &self,
        session: &Session,
        params: &InputParameters,
        renderer: &mut dyn ProjectionRenderer,
        progress: &mut ProgressReporter,
    ) -> Result<LoopEnd, JobError> {
        let session_id = session.id;
        let mut rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let poses = ParameterSampler::sample(params, &mut rng);
        let total = poses.len();

        for (index, pose) in poses.poses().enumerate() {
            match self.ctx.store.current_status(session_id).await? {
                Some(SessionStatus::Running) => {}
                Some(status) => return Ok(LoopEnd::Interrupted(status)),
                None => return Err(JobError::SessionMissing(session_id)),
            }

            progress.update(
                index as f64 / total as f64,
                format!("Rendering sample {} of {total}", index + 1),
            );

            let raw = renderer.render(&pose).await?;
            let primary = self.codec.encode_primary(&raw)?;
            let thumbnail = self.codec.encode_thumbnail(&raw)?;

            let image_key = blob_keys::primary_image_key(session_id, index);
            let thumbnail_key = blob_keys::thumbnail_key(session_id, index);
            self.ctx.blobs.put(&image_key, primary).await?;
            self.ctx.blobs.put(&thumbnail_key, thumbnail).await?;

            let inserted = self
                .ctx
                .store
                .insert_output_image(&NewOutputImage {
                    session_id,
                    sample_index: index as i32,
                    image_key: image_key.clone(),
                    thumbnail_key: thumbnail_key.clone(),
                    pose,
                })
                .await;
            if let Err(e) = inserted {
                // No row references these blobs, so nothing else will remove them.
                for key in [&image_key, &thumbnail_key] {
                    if let Err(cleanup) = self.ctx.blobs.delete(key).await {
                        tracing::warn!(
                            %session_id,
                            key = %key,
                            error = %cleanup,
                            "Orphaned blob left behind",
                        );
                    }
                }
                return Err(e.into());
            }
            tracing::debug!(%session_id, sample = index, total, "Sample rendered");
        }

        Ok(LoopEnd::Completed(total))
    }

    async fn finalize(
        &self,
        session: &Session,
        images: usize,
        progress: &mut ProgressReporter,
    ) -> Result<RenderOutcome, JobError> {
        let session_id = session.id;
        match self.ctx.store.finish_session(session_id).await? {
            FinishOutcome::Processed => {
                progress.update(1.0, "Complete");
                progress.end(SessionStatus::Processed);
                let archive = self
                    .ctx
                    .queue
                    .enqueue(NewJob::new(JobKind::Archive, session_id))
                    .await?;
                tracing::info!(%session_id, images, archive_job_id = %archive.id, "Session processed");
                Ok(RenderOutcome::Completed { images })
            }
            FinishOutcome::CancelRequested => self.cancel(session_id, progress).await,
            FinishOutcome::Unexpected(status) => self.abandon(session_id, status).await,
        }
    }

    /// The session left `running` without a cancel this loop can act on.
    /// Outputs of a session that is `not-started` again would collide with
    /// the next run, so they go. A deleting session is left to its cascade.
    async fn abandon(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> Result<RenderOutcome, JobError> {
        let purged = if status == SessionStatus::NotStarted {
            purge_output_images(&self.ctx, session_id).await?
        } else {
            0
        };
        tracing::warn!(%session_id, %status, purged, "Session left running; render loop abandoned");
        Ok(RenderOutcome::Abandoned(status))
    }

    async fn cancel(
        &self,
        session_id: SessionId,
        progress: &mut ProgressReporter,
    ) -> Result<RenderOutcome, JobError> {
        let purged = purge_output_images(&self.ctx, session_id).await?;
        self.ctx
            .store
            .revert_to_not_started(session_id, SessionStatus::Cancelled)
            .await?;
        progress.end(SessionStatus::NotStarted);
        tracing::info!(%session_id, purged, "Session cancelled");
        Ok(RenderOutcome::Cancelled { purged })
    }
}
