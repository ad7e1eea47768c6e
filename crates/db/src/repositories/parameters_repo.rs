//! Repository for the `input_parameters` table.

use sqlx::PgPool;
use xraygen_core::parameters::InputParameters;
use xraygen_core::session::{self, SessionStatus};
use xraygen_core::types::SessionId;

use crate::error::StoreError;
use crate::models::parameters::InputParametersRow;

/// Column list for `input_parameters` queries.
const COLUMNS: &str = "\
    session_id, source_to_detector_distance, detector_diameter, num_samples, \
    push_pull_mean, push_pull_std_dev, head_foot_mean, head_foot_std_dev, \
    raise_lower_mean, raise_lower_std_dev, alpha_mean, alpha_concentration, \
    beta_mean, beta_concentration";

pub struct InputParametersRepo;

impl InputParametersRepo {
    /// Insert or replace the parameters of a session that has not started.
    pub async fn upsert(
        pool: &PgPool,
        session_id: SessionId,
        params: &InputParameters,
    ) -> Result<(), StoreError> {
        let mut tx = pool.begin().await?;
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        let status = status
            .ok_or(StoreError::SessionNotFound(session_id))?
            .parse::<SessionStatus>()
            .map_err(|e| StoreError::Corrupt(format!("session {session_id}: {e}")))?;
        session::check_parameters_editable(status)?;

        let query = format!(
            "INSERT INTO input_parameters ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (session_id) DO UPDATE SET \
                 source_to_detector_distance = EXCLUDED.source_to_detector_distance, \
                 detector_diameter = EXCLUDED.detector_diameter, \
                 num_samples = EXCLUDED.num_samples, \
                 push_pull_mean = EXCLUDED.push_pull_mean, \
                 push_pull_std_dev = EXCLUDED.push_pull_std_dev, \
                 head_foot_mean = EXCLUDED.head_foot_mean, \
                 head_foot_std_dev = EXCLUDED.head_foot_std_dev, \
                 raise_lower_mean = EXCLUDED.raise_lower_mean, \
                 raise_lower_std_dev = EXCLUDED.raise_lower_std_dev, \
                 alpha_mean = EXCLUDED.alpha_mean, \
                 alpha_concentration = EXCLUDED.alpha_concentration, \
                 beta_mean = EXCLUDED.beta_mean, \
                 beta_concentration = EXCLUDED.beta_concentration"
        );
        sqlx::query(&query)
            .bind(session_id)
            .bind(params.source_to_detector_distance)
            .bind(params.detector_diameter)
            .bind(params.num_samples)
            .bind(params.push_pull.mean)
            .bind(params.push_pull.std_dev)
            .bind(params.head_foot.mean)
            .bind(params.head_foot.std_dev)
            .bind(params.raise_lower.mean)
            .bind(params.raise_lower.std_dev)
            .bind(params.alpha.mean_degrees)
            .bind(params.alpha.concentration)
            .bind(params.beta.mean_degrees)
            .bind(params.beta.concentration)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn find_by_session(
        pool: &PgPool,
        session_id: SessionId,
    ) -> Result<Option<InputParameters>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM input_parameters WHERE session_id = $1");
        let row = sqlx::query_as::<_, InputParametersRow>(&query)
            .bind(session_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(InputParameters::from))
    }
}
