//! Repository for the `jobs` table.
//!
//! Uses `JobStatus` from `models::status` for all status transitions.

use sqlx::PgPool;
use xraygen_core::types::JobId;

use crate::error::StoreError;
use crate::models::job::{Job, JobRow, NewJob};
use crate::models::status::JobStatus;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, kind, session_id, status_id, worker, attempts, error_message, \
    submitted_at, claimed_at, completed_at";

/// Provides queue operations for background jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job.
    pub async fn enqueue(pool: &PgPool, input: &NewJob) -> Result<Job, StoreError> {
        let query = format!(
            "INSERT INTO jobs (id, kind, session_id, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(input.id)
            .bind(input.kind.as_str())
            .bind(input.session_id)
            .bind(JobStatus::Pending.id())
            .fetch_one(pool)
            .await?;
        row.try_into()
    }

    /// Atomically claim the oldest pending job for `worker`.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// receive the same delivery from one poll.
    pub async fn claim_next(pool: &PgPool, worker: &str) -> Result<Option<Job>, StoreError> {
        let query = format!(
            "UPDATE jobs \
             SET worker = $1, claimed_at = NOW(), status_id = $2, attempts = attempts + 1 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = $3 \
                 ORDER BY submitted_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(worker)
            .bind(JobStatus::Claimed.id())
            .bind(JobStatus::Pending.id())
            .fetch_optional(pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// Mark a claimed job as completed.
    pub async fn acknowledge(pool: &PgPool, id: JobId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET status_id = $2, completed_at = NOW(), worker = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(JobStatus::Completed.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a job as failed. No automatic retry is performed.
    pub async fn fail(pool: &PgPool, id: JobId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, completed_at = NOW(), worker = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// Return every job still claimed by `worker` to the pending state.
    ///
    /// Called on worker start-up so deliveries interrupted by a crash are
    /// redelivered.
    pub async fn requeue_claimed_by(pool: &PgPool, worker: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status_id = $2, worker = NULL, claimed_at = NULL \
             WHERE worker = $1 AND status_id = $3",
        )
        .bind(worker)
        .bind(JobStatus::Pending.id())
        .bind(JobStatus::Claimed.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
