//! Request-side session use cases.
//!
//! Authentication happens upstream; each call receives a resolved
//! [`Actor`]. Non-staff actors only ever see their own sessions, and a
//! session owned by someone else is reported exactly like a missing one.

use chrono::Utc;
use xraygen_core::error::CoreError;
use xraygen_core::parameters::InputParameters;
use xraygen_core::session::{CancelOutcome, SessionStatus};
use xraygen_core::types::{Actor, JobId, SessionId};
use xraygen_core::volume::VolumeFormat;
use xraygen_db::models::job::{Job, JobKind, NewJob};
use xraygen_db::models::session::{CreateSession, Session, SessionFilter};

use crate::context::PipelineContext;

/// Default cap on sessions per non-staff user.
pub const DEFAULT_USER_SESSION_LIMIT: i64 = 5;

/// Number of leading bytes read when sniffing a volume format.
const SNIFF_LEN: usize = 512;

#[derive(Clone)]
pub struct SessionService {
    ctx: PipelineContext,
    user_session_limit: i64,
}

impl SessionService {
    pub fn new(ctx: PipelineContext, user_session_limit: i64) -> Self {
        Self {
            ctx,
            user_session_limit,
        }
    }

    /// Create a session around an input volume already stored under
    /// `input_volume_key`.
    ///
    /// The format is taken from `format` when given, else from the key's
    /// file extension, else from the volume's magic bytes.
    pub async fn create(
        &self,
        actor: Actor,
        input_volume_key: &str,
        format: Option<VolumeFormat>,
    ) -> Result<Session, CoreError> {
        if !actor.is_staff {
            let owned = self.ctx.store.count_sessions_for_owner(actor.user_id).await?;
            if owned >= self.user_session_limit {
                return Err(CoreError::Forbidden(format!(
                    "Session limit of {} reached",
                    self.user_session_limit
                )));
            }
        }

        let bytes = match self.ctx.blobs.get(input_volume_key).await {
            Ok(bytes) => bytes,
            Err(xraygen_core::storage::BlobError::NotFound(_)) => {
                return Err(CoreError::Validation(format!(
                    "Input volume '{input_volume_key}' does not exist"
                )));
            }
            Err(e) => return Err(CoreError::Internal(e.to_string())),
        };

        let input_volume_format = format
            .or_else(|| VolumeFormat::from_file_name(input_volume_key))
            .or_else(|| VolumeFormat::sniff(&bytes[..bytes.len().min(SNIFF_LEN)]))
            .ok_or_else(|| {
                CoreError::Validation("Could not determine input volume format".into())
            })?;

        let session = self
            .ctx
            .store
            .create_session(&CreateSession {
                owner_id: actor.user_id,
                input_volume_key: input_volume_key.to_string(),
                input_volume_format,
            })
            .await?;
        tracing::info!(
            session_id = %session.id,
            owner_id = actor.user_id,
            format = %input_volume_format,
            "Session created",
        );
        Ok(session)
    }

    /// Replace the session's parameters. Only allowed before the first run.
    pub async fn set_parameters(
        &self,
        actor: Actor,
        session_id: SessionId,
        params: &InputParameters,
    ) -> Result<(), CoreError> {
        params.check()?;
        self.visible_session(actor, session_id).await?;
        self.ctx.store.save_parameters(session_id, params).await?;
        Ok(())
    }

    pub async fn get(&self, actor: Actor, session_id: SessionId) -> Result<Session, CoreError> {
        self.visible_session(actor, session_id).await
    }

    pub async fn parameters(
        &self,
        actor: Actor,
        session_id: SessionId,
    ) -> Result<Option<InputParameters>, CoreError> {
        self.visible_session(actor, session_id).await?;
        Ok(self.ctx.store.find_parameters(session_id).await?)
    }

    /// Sessions visible to `actor`, excluding those being deleted.
    pub async fn list(
        &self,
        actor: Actor,
        statuses: Option<&[SessionStatus]>,
    ) -> Result<Vec<Session>, CoreError> {
        let mut filter = if actor.is_staff {
            SessionFilter::default()
        } else {
            SessionFilter::owned_by(actor.user_id)
        };
        if let Some(statuses) = statuses {
            filter = filter.with_statuses(statuses);
        }
        Ok(self.ctx.store.list_sessions(&filter).await?)
    }

    /// Move a `not-started` session with parameters to `queued` and enqueue
    /// its render job. Returns the job handle.
    pub async fn submit(&self, actor: Actor, session_id: SessionId) -> Result<JobId, CoreError> {
        self.owned_session(actor, session_id).await?;

        let job = NewJob::new(JobKind::Render, session_id);
        let job_id = job.id;
        self.ctx
            .store
            .queue_session(session_id, job_id, Utc::now())
            .await?;

        if let Err(e) = self.ctx.queue.enqueue(job).await {
            tracing::error!(%session_id, %job_id, error = %e, "Failed to enqueue render job");
            if let Err(revert) = self
                .ctx
                .store
                .revert_to_not_started(session_id, SessionStatus::Queued)
                .await
            {
                tracing::error!(%session_id, error = %revert, "Failed to revert unqueued session");
            }
            return Err(CoreError::Internal(format!("Failed to enqueue render job: {e}")));
        }

        tracing::info!(%session_id, %job_id, "Session submitted");
        Ok(job_id)
    }

    /// Ask a queued or running session to stop.
    ///
    /// Only the flag is set here; the job observes it at the next sample
    /// boundary and reverts the session.
    pub async fn request_cancel(
        &self,
        actor: Actor,
        session_id: SessionId,
    ) -> Result<CancelOutcome, CoreError> {
        self.owned_session(actor, session_id).await?;
        let outcome = self.ctx.store.request_cancel(session_id).await?;
        match outcome {
            CancelOutcome::Requested => tracing::info!(%session_id, "Cancellation requested"),
            CancelOutcome::NotCancellable(status) => {
                tracing::debug!(%session_id, %status, "Cancel ignored; nothing running");
            }
        }
        Ok(outcome)
    }

    /// Staff only. Marks the session `deleting` and enqueues the cascade.
    pub async fn request_delete(
        &self,
        actor: Actor,
        session_id: SessionId,
    ) -> Result<JobId, CoreError> {
        if !actor.is_staff {
            return Err(CoreError::Forbidden("Only staff may delete sessions".into()));
        }
        self.ctx.store.mark_deleting(session_id).await?;
        let job = self
            .ctx
            .queue
            .enqueue(NewJob::new(JobKind::Delete, session_id))
            .await?;
        tracing::info!(%session_id, job_id = %job.id, actor = actor.user_id, "Session delete requested");
        Ok(job.id)
    }

    /// Staff only. The render job behind the session's job handle.
    pub async fn task_trace(&self, actor: Actor, session_id: SessionId) -> Result<Job, CoreError> {
        if !actor.is_staff {
            return Err(CoreError::Forbidden("Task traces are staff only".into()));
        }
        let session = self
            .ctx
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Session", session_id))?;
        let job_id = session
            .job_id
            .ok_or_else(|| CoreError::not_found("Job", format!("session {session_id}")))?;
        self.ctx
            .queue
            .find_job(job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Job", job_id))
    }

    // -----------------------------------------------------------------------
    // Visibility
    // -----------------------------------------------------------------------

    /// Readable by the owner and by staff.
    async fn visible_session(
        &self,
        actor: Actor,
        session_id: SessionId,
    ) -> Result<Session, CoreError> {
        match self.ctx.store.find_session(session_id).await? {
            Some(s) if s.status != SessionStatus::Deleting
                && (actor.is_staff || s.owner_id == actor.user_id) =>
            {
                Ok(s)
            }
            _ => Err(CoreError::not_found("Session", session_id)),
        }
    }

    /// Only the owner may start or cancel a session.
    async fn owned_session(
        &self,
        actor: Actor,
        session_id: SessionId,
    ) -> Result<Session, CoreError> {
        match self.ctx.store.find_session(session_id).await? {
            Some(s) if s.status != SessionStatus::Deleting && s.owner_id == actor.user_id => Ok(s),
            _ => Err(CoreError::not_found("Session", session_id)),
        }
    }
}
