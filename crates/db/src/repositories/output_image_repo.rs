//! Repository for the `output_images` table.

use sqlx::{PgConnection, PgPool};
use xraygen_core::types::SessionId;

use crate::error::StoreError;
use crate::models::output_image::{NewOutputImage, OutputImage, OutputImageRow};

/// Column list for `output_images` queries.
const COLUMNS: &str = "\
    id, session_id, sample_index, image_key, thumbnail_key, pose, created_at";

pub struct OutputImageRepo;

impl OutputImageRepo {
    pub async fn insert(pool: &PgPool, input: &NewOutputImage) -> Result<OutputImage, StoreError> {
        let pose = serde_json::to_value(input.pose)
            .map_err(|e| StoreError::Corrupt(format!("pose: {e}")))?;
        let query = format!(
            "INSERT INTO output_images (session_id, sample_index, image_key, thumbnail_key, pose) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, OutputImageRow>(&query)
            .bind(input.session_id)
            .bind(input.sample_index)
            .bind(&input.image_key)
            .bind(&input.thumbnail_key)
            .bind(pose)
            .fetch_one(pool)
            .await?;
        row.try_into()
    }

    /// All images of a session in sample order.
    pub async fn list_by_session(
        pool: &PgPool,
        session_id: SessionId,
    ) -> Result<Vec<OutputImage>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM output_images WHERE session_id = $1 ORDER BY sample_index ASC"
        );
        sqlx::query_as::<_, OutputImageRow>(&query)
            .bind(session_id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(OutputImage::try_from)
            .collect()
    }

    /// Delete every image row of a session, returning the removed rows so
    /// the caller can remove their blobs.
    pub async fn delete_by_session(
        conn: &mut PgConnection,
        session_id: SessionId,
    ) -> Result<Vec<OutputImage>, StoreError> {
        let query =
            format!("DELETE FROM output_images WHERE session_id = $1 RETURNING {COLUMNS}");
        let mut images = sqlx::query_as::<_, OutputImageRow>(&query)
            .bind(session_id)
            .fetch_all(conn)
            .await?
            .into_iter()
            .map(OutputImage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        images.sort_by_key(|image| image.sample_index);
        Ok(images)
    }
}
