//! Repository for the `sessions` table and its guarded status transitions.

use sqlx::{PgConnection, PgPool};
use xraygen_core::session::{
    self, CancelOutcome, ClaimAction, ClaimOutcome, FinishOutcome, SessionStatus,
};
use xraygen_core::types::{DbId, JobId, SessionId, Timestamp};

use crate::error::StoreError;
use crate::repositories::OutputImageRepo;
use crate::models::output_image::OutputImage;
use crate::models::session::{CreateSession, Session, SessionFilter, SessionRow, StuckSession};

/// Column list for `sessions` queries.
const COLUMNS: &str = "\
    id, owner_id, input_volume_key, input_volume_format, status, \
    job_id, archive_key, created_at, started_at, claimed_at";

/// Same columns qualified with the `s` alias, for joins.
const JOINED_COLUMNS: &str = "\
    s.id, s.owner_id, s.input_volume_key, s.input_volume_format, s.status, \
    s.job_id, s.archive_key, s.created_at, s.started_at, s.claimed_at";

/// Provides queries and locked transitions for sessions.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new `not-started` session.
    pub async fn create(pool: &PgPool, input: &CreateSession) -> Result<Session, StoreError> {
        let query = format!(
            "INSERT INTO sessions (id, owner_id, input_volume_key, input_volume_format, status) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(uuid::Uuid::new_v4())
            .bind(input.owner_id)
            .bind(&input.input_volume_key)
            .bind(input.input_volume_format.as_str())
            .bind(SessionStatus::NotStarted.as_str())
            .fetch_one(pool)
            .await?;
        row.try_into()
    }

    pub async fn find_by_id(pool: &PgPool, id: SessionId) -> Result<Option<Session>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM sessions WHERE id = $1");
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Session::try_from)
            .transpose()
    }

    /// List sessions matching `filter`, newest first.
    pub async fn list(pool: &PgPool, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        let statuses: Option<Vec<&str>> = filter
            .statuses
            .as_ref()
            .map(|s| s.iter().map(|status| status.as_str()).collect());
        let query = format!(
            "SELECT {COLUMNS} FROM sessions \
             WHERE ($1::BIGINT IS NULL OR owner_id = $1) \
               AND ($2::TEXT[] IS NULL OR status = ANY($2)) \
               AND ($3 OR status <> $4) \
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(filter.owner_id)
            .bind(statuses)
            .bind(filter.include_deleting)
            .bind(SessionStatus::Deleting.as_str())
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(Session::try_from)
            .collect()
    }

    /// Sessions counted against the owner's quota. Rows being deleted do not count.
    pub async fn count_for_owner(pool: &PgPool, owner_id: DbId) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE owner_id = $1 AND status <> $2")
                .bind(owner_id)
                .bind(SessionStatus::Deleting.as_str())
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    pub async fn current_status(
        pool: &PgPool,
        id: SessionId,
    ) -> Result<Option<SessionStatus>, StoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        status.map(|s| parse_status(id, &s)).transpose()
    }

    /// `NotStarted -> Queued`. Checks parameters and status under the row
    /// lock, then records `started_at` and the job handle.
    pub async fn queue(
        pool: &PgPool,
        id: SessionId,
        job_id: JobId,
        now: Timestamp,
    ) -> Result<Session, StoreError> {
        let mut tx = pool.begin().await?;
        let status = lock_status(&mut tx, id)
            .await?
            .ok_or(StoreError::SessionNotFound(id))?;
        let (has_parameters,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM input_parameters WHERE session_id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        session::check_initiate(status, has_parameters)?;

        let query = format!(
            "UPDATE sessions SET status = $2, started_at = $3, job_id = $4, claimed_at = NULL \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(id)
            .bind(SessionStatus::Queued.as_str())
            .bind(now)
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        row.try_into()
    }

    /// `Queued -> Running`, or revert a session cancelled while queued.
    pub async fn claim(pool: &PgPool, id: SessionId) -> Result<ClaimOutcome, StoreError> {
        let mut tx = pool.begin().await?;
        let locked: Option<(String, Option<Timestamp>)> =
            sqlx::query_as("SELECT status, claimed_at FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((raw, claimed_at)) = locked else {
            return Ok(ClaimOutcome::Missing);
        };
        let status = parse_status(id, &raw)?;
        let outcome = match session::claim_action(status, claimed_at.is_some()) {
            ClaimAction::MarkRunning => {
                sqlx::query("UPDATE sessions SET status = $2, claimed_at = NOW() WHERE id = $1")
                    .bind(id)
                    .bind(SessionStatus::Running.as_str())
                    .execute(&mut *tx)
                    .await?;
                ClaimOutcome::Claimed
            }
            ClaimAction::RevertToNotStarted => {
                set_status(&mut tx, id, SessionStatus::NotStarted).await?;
                ClaimOutcome::CancelledBeforeStart
            }
            ClaimAction::NoOp => ClaimOutcome::NotClaimable(status),
        };
        tx.commit().await?;
        Ok(outcome)
    }

    /// `Queued|Running -> Cancelled`.
    pub async fn request_cancel(pool: &PgPool, id: SessionId) -> Result<CancelOutcome, StoreError> {
        let mut tx = pool.begin().await?;
        let status = lock_status(&mut tx, id)
            .await?
            .ok_or(StoreError::SessionNotFound(id))?;
        if !session::can_request_cancel(status) {
            return Ok(CancelOutcome::NotCancellable(status));
        }
        set_status(&mut tx, id, SessionStatus::Cancelled).await?;
        tx.commit().await?;
        Ok(CancelOutcome::Requested)
    }

    /// Move the session back to `not-started` if it is still in `from`.
    pub async fn revert_to_not_started(
        pool: &PgPool,
        id: SessionId,
        from: SessionStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET status = $3, claimed_at = NULL WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(SessionStatus::NotStarted.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `Running -> Processed`, unless a cancellation arrived first.
    pub async fn finish(pool: &PgPool, id: SessionId) -> Result<FinishOutcome, StoreError> {
        let mut tx = pool.begin().await?;
        let status = lock_status(&mut tx, id)
            .await?
            .ok_or(StoreError::SessionNotFound(id))?;
        let outcome = session::finish_outcome(status);
        if outcome == FinishOutcome::Processed {
            set_status(&mut tx, id, SessionStatus::Processed).await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    /// `* -> Deleting`.
    pub async fn mark_deleting(pool: &PgPool, id: SessionId) -> Result<Session, StoreError> {
        let query = format!("UPDATE sessions SET status = $2 WHERE id = $1 RETURNING {COLUMNS}");
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(id)
            .bind(SessionStatus::Deleting.as_str())
            .fetch_optional(pool)
            .await?
            .ok_or(StoreError::SessionNotFound(id))?
            .try_into()
    }

    /// Remove the session row and return the output rows removed with it.
    /// Parameters cascade. Holding the row lock keeps a concurrent insert
    /// from slipping in between the two deletes.
    pub async fn delete(
        pool: &PgPool,
        id: SessionId,
    ) -> Result<Option<Vec<OutputImage>>, StoreError> {
        let mut tx = pool.begin().await?;
        if lock_status(&mut tx, id).await?.is_none() {
            return Ok(None);
        }
        let images = OutputImageRepo::delete_by_session(&mut *tx, id).await?;
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(images))
    }

    /// Replace the archive reference, returning the previous one.
    pub async fn swap_archive(
        pool: &PgPool,
        id: SessionId,
        archive_key: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let mut tx = pool.begin().await?;
        let previous: Option<Option<String>> =
            sqlx::query_scalar("SELECT archive_key FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let previous = previous.ok_or(StoreError::SessionNotFound(id))?;
        sqlx::query("UPDATE sessions SET archive_key = $2 WHERE id = $1")
            .bind(id)
            .bind(archive_key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(previous)
    }

    /// Active sessions whose elapsed time exceeds `budget_secs` per sample.
    pub async fn find_stuck(
        pool: &PgPool,
        now: Timestamp,
        budget_secs: f64,
    ) -> Result<Vec<StuckSession>, StoreError> {
        let statuses: Vec<&str> = SessionStatus::ACTIVE.iter().map(|s| s.as_str()).collect();
        let query = format!(
            "SELECT {JOINED_COLUMNS}, COALESCE(p.num_samples, 0) AS num_samples \
             FROM sessions s \
             LEFT JOIN input_parameters p ON p.session_id = s.id \
             WHERE s.status = ANY($1) \
               AND s.started_at IS NOT NULL \
               AND $2 - s.started_at > \
                   make_interval(secs => $3 * GREATEST(COALESCE(p.num_samples, 0), 1)) \
             ORDER BY s.started_at ASC"
        );
        let rows: Vec<StuckRow> = sqlx::query_as(&query)
            .bind(statuses)
            .bind(now)
            .bind(budget_secs)
            .fetch_all(pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let num_samples = row.num_samples;
                let session = Session::try_from(row.session)?;
                let elapsed = session.started_at.map(|s| now - s).unwrap_or_default();
                Ok(StuckSession {
                    session,
                    num_samples,
                    elapsed,
                })
            })
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct StuckRow {
    #[sqlx(flatten)]
    session: SessionRow,
    num_samples: i32,
}

async fn lock_status(
    conn: &mut PgConnection,
    id: SessionId,
) -> Result<Option<SessionStatus>, StoreError> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM sessions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    status.map(|s| parse_status(id, &s)).transpose()
}

async fn set_status(
    conn: &mut PgConnection,
    id: SessionId,
    status: SessionStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET status = $2 WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn parse_status(id: SessionId, raw: &str) -> Result<SessionStatus, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("session {id}: {e}")))
}
