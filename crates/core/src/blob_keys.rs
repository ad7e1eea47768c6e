//! Blob key layout for session artifacts.
//!
//! ```text
//! sessions/{session_id}/images/{index:03}.png
//! sessions/{session_id}/thumbnails/{index:03}.png
//! sessions/{session_id}/archives/{version}.zip
//! ```

use uuid::Uuid;

use crate::types::SessionId;

/// Prefix under which every blob of a session lives.
pub fn session_prefix(session_id: SessionId) -> String {
    format!("sessions/{session_id}/")
}

/// Primary (full bit depth) image for sample `index`.
pub fn primary_image_key(session_id: SessionId, index: usize) -> String {
    format!("sessions/{session_id}/images/{index:03}.png")
}

/// Preview thumbnail for sample `index`.
pub fn thumbnail_key(session_id: SessionId, index: usize) -> String {
    format!("sessions/{session_id}/thumbnails/{index:03}.png")
}

/// A fresh archive key. Each build writes a new version so the previous
/// bundle stays readable until the session reference is swapped.
pub fn archive_key(session_id: SessionId, version: Uuid) -> String {
    format!("sessions/{session_id}/archives/{version}.zip")
}

/// File name used for sample `index` inside the archive.
pub fn archive_entry_name(index: usize) -> String {
    format!("image_{index:03}.png")
}
