//! Store and queue seams used by the pipeline, with Postgres implementations.

use async_trait::async_trait;
use xraygen_core::parameters::InputParameters;
use xraygen_core::session::{CancelOutcome, ClaimOutcome, FinishOutcome, SessionStatus};
use xraygen_core::types::{DbId, JobId, SessionId, Timestamp};

use crate::error::StoreError;
use crate::models::job::{Job, NewJob};
use crate::models::output_image::{NewOutputImage, OutputImage};
use crate::models::session::{CreateSession, Session, SessionFilter, StuckSession};
use crate::repositories::{InputParametersRepo, JobRepo, OutputImageRepo, SessionRepo};
use crate::DbPool;

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Sessions, their parameters and outputs.
///
/// Every transition method applies the guards from
/// [`xraygen_core::session`] inside one critical section: the status is
/// read, checked and written while no other transition on the same session
/// can interleave.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, input: &CreateSession) -> Result<Session, StoreError>;

    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError>;

    /// Sessions owned by `owner_id` that count against the quota.
    async fn count_sessions_for_owner(&self, owner_id: DbId) -> Result<i64, StoreError>;

    /// Insert or replace parameters. Rejected once the session has started.
    async fn save_parameters(
        &self,
        id: SessionId,
        params: &InputParameters,
    ) -> Result<(), StoreError>;

    async fn find_parameters(&self, id: SessionId) -> Result<Option<InputParameters>, StoreError>;

    /// `NotStarted -> Queued`, recording `now` as the start time and
    /// `job_id` as the job handle.
    async fn queue_session(
        &self,
        id: SessionId,
        job_id: JobId,
        now: Timestamp,
    ) -> Result<Session, StoreError>;

    async fn claim_session(&self, id: SessionId) -> Result<ClaimOutcome, StoreError>;

    async fn request_cancel(&self, id: SessionId) -> Result<CancelOutcome, StoreError>;

    async fn current_status(&self, id: SessionId) -> Result<Option<SessionStatus>, StoreError>;

    /// Conditional `from -> NotStarted`. Returns whether the row changed.
    async fn revert_to_not_started(
        &self,
        id: SessionId,
        from: SessionStatus,
    ) -> Result<bool, StoreError>;

    async fn finish_session(&self, id: SessionId) -> Result<FinishOutcome, StoreError>;

    async fn mark_deleting(&self, id: SessionId) -> Result<Session, StoreError>;

    /// Remove the session, its parameters and output rows. Returns the
    /// output rows removed with it, or `None` if the session was gone.
    async fn delete_session(&self, id: SessionId) -> Result<Option<Vec<OutputImage>>, StoreError>;

    async fn insert_output_image(&self, image: &NewOutputImage) -> Result<OutputImage, StoreError>;

    async fn list_output_images(&self, id: SessionId) -> Result<Vec<OutputImage>, StoreError>;

    /// Delete all output rows of a session and return them.
    async fn delete_output_images(&self, id: SessionId) -> Result<Vec<OutputImage>, StoreError>;

    /// Atomically replace the archive reference. Returns the previous key.
    async fn swap_archive(
        &self,
        id: SessionId,
        archive_key: Option<&str>,
    ) -> Result<Option<String>, StoreError>;

    /// Active sessions older than `budget` per sample.
    async fn find_stuck_sessions(
        &self,
        now: Timestamp,
        budget: chrono::Duration,
    ) -> Result<Vec<StuckSession>, StoreError>;
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

/// At-least-once work queue.
///
/// A claimed job stays invisible to other workers until it is acknowledged
/// or failed. [`requeue_claimed_by`](JobQueue::requeue_claimed_by) makes the
/// unfinished deliveries of a restarted worker visible again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn claim_next(&self, worker: &str) -> Result<Option<Job>, StoreError>;

    async fn acknowledge(&self, id: JobId) -> Result<(), StoreError>;

    async fn fail(&self, id: JobId, error: &str) -> Result<(), StoreError>;

    async fn find_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn requeue_claimed_by(&self, worker: &str) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementations
// ---------------------------------------------------------------------------

/// [`SessionStore`] over a Postgres pool.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: DbPool,
}

impl PgSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, input: &CreateSession) -> Result<Session, StoreError> {
        SessionRepo::create(&self.pool, input).await
    }

    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        SessionRepo::find_by_id(&self.pool, id).await
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        SessionRepo::list(&self.pool, filter).await
    }

    async fn count_sessions_for_owner(&self, owner_id: DbId) -> Result<i64, StoreError> {
        Ok(SessionRepo::count_for_owner(&self.pool, owner_id).await?)
    }

    async fn save_parameters(
        &self,
        id: SessionId,
        params: &InputParameters,
    ) -> Result<(), StoreError> {
        InputParametersRepo::upsert(&self.pool, id, params).await
    }

    async fn find_parameters(&self, id: SessionId) -> Result<Option<InputParameters>, StoreError> {
        Ok(InputParametersRepo::find_by_session(&self.pool, id).await?)
    }

    async fn queue_session(
        &self,
        id: SessionId,
        job_id: JobId,
        now: Timestamp,
    ) -> Result<Session, StoreError> {
        SessionRepo::queue(&self.pool, id, job_id, now).await
    }

    async fn claim_session(&self, id: SessionId) -> Result<ClaimOutcome, StoreError> {
        SessionRepo::claim(&self.pool, id).await
    }

    async fn request_cancel(&self, id: SessionId) -> Result<CancelOutcome, StoreError> {
        SessionRepo::request_cancel(&self.pool, id).await
    }

    async fn current_status(&self, id: SessionId) -> Result<Option<SessionStatus>, StoreError> {
        SessionRepo::current_status(&self.pool, id).await
    }

    async fn revert_to_not_started(
        &self,
        id: SessionId,
        from: SessionStatus,
    ) -> Result<bool, StoreError> {
        Ok(SessionRepo::revert_to_not_started(&self.pool, id, from).await?)
    }

    async fn finish_session(&self, id: SessionId) -> Result<FinishOutcome, StoreError> {
        SessionRepo::finish(&self.pool, id).await
    }

    async fn mark_deleting(&self, id: SessionId) -> Result<Session, StoreError> {
        SessionRepo::mark_deleting(&self.pool, id).await
    }

    async fn delete_session(&self, id: SessionId) -> Result<Option<Vec<OutputImage>>, StoreError> {
        SessionRepo::delete(&self.pool, id).await
    }

    async fn insert_output_image(&self, image: &NewOutputImage) -> Result<OutputImage, StoreError> {
        OutputImageRepo::insert(&self.pool, image).await
    }

    async fn list_output_images(&self, id: SessionId) -> Result<Vec<OutputImage>, StoreError> {
        OutputImageRepo::list_by_session(&self.pool, id).await
    }

    async fn delete_output_images(&self, id: SessionId) -> Result<Vec<OutputImage>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        OutputImageRepo::delete_by_session(&mut *conn, id).await
    }

    async fn swap_archive(
        &self,
        id: SessionId,
        archive_key: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        SessionRepo::swap_archive(&self.pool, id, archive_key).await
    }

    async fn find_stuck_sessions(
        &self,
        now: Timestamp,
        budget: chrono::Duration,
    ) -> Result<Vec<StuckSession>, StoreError> {
        let budget_secs = budget.num_milliseconds() as f64 / 1000.0;
        SessionRepo::find_stuck(&self.pool, now, budget_secs).await
    }
}

/// [`JobQueue`] over a Postgres pool.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        JobRepo::enqueue(&self.pool, &job).await
    }

    async fn claim_next(&self, worker: &str) -> Result<Option<Job>, StoreError> {
        JobRepo::claim_next(&self.pool, worker).await
    }

    async fn acknowledge(&self, id: JobId) -> Result<(), StoreError> {
        Ok(JobRepo::acknowledge(&self.pool, id).await?)
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<(), StoreError> {
        Ok(JobRepo::fail(&self.pool, id, error).await?)
    }

    async fn find_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        JobRepo::find_by_id(&self.pool, id).await
    }

    async fn requeue_claimed_by(&self, worker: &str) -> Result<u64, StoreError> {
        Ok(JobRepo::requeue_claimed_by(&self.pool, worker).await?)
    }
}
