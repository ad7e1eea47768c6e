//! Output image entity: one rendered view of a session.

use serde::Serialize;
use sqlx::FromRow;
use xraygen_core::sampler::Pose;
use xraygen_core::types::{DbId, SessionId, Timestamp};

use crate::error::StoreError;

/// A rendered view and the exact pose that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputImage {
    pub id: DbId,
    pub session_id: SessionId,
    /// Position of the pose in the sampled sequence.
    pub sample_index: i32,
    /// Blob key of the full bit-depth image.
    pub image_key: String,
    pub thumbnail_key: String,
    pub pose: Pose,
    pub created_at: Timestamp,
}

/// A row from the `output_images` table.
#[derive(Debug, Clone, FromRow)]
pub struct OutputImageRow {
    pub id: DbId,
    pub session_id: SessionId,
    pub sample_index: i32,
    pub image_key: String,
    pub thumbnail_key: String,
    pub pose: serde_json::Value,
    pub created_at: Timestamp,
}

impl TryFrom<OutputImageRow> for OutputImage {
    type Error = StoreError;

    fn try_from(row: OutputImageRow) -> Result<Self, Self::Error> {
        let pose = serde_json::from_value(row.pose)
            .map_err(|e| StoreError::Corrupt(format!("output image {}: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            sample_index: row.sample_index,
            image_key: row.image_key,
            thumbnail_key: row.thumbnail_key,
            pose,
            created_at: row.created_at,
        })
    }
}

/// DTO for recording a freshly rendered view.
#[derive(Debug, Clone)]
pub struct NewOutputImage {
    pub session_id: SessionId,
    pub sample_index: i32,
    pub image_key: String,
    pub thumbnail_key: String,
    pub pose: Pose,
}
