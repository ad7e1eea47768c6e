//! Blob storage abstraction (images, thumbnails, archives, input volumes).
//!
//! [`BlobStore`] is the seam the pipeline writes through. Two backends ship
//! with the crate:
//!
//! - [`LocalBlobStore`] keeps blobs as files under a base directory and
//!   writes via temp-file + rename so readers never see partial content.
//! - [`MemoryBlobStore`] keeps blobs in a map; used by tests and
//!   single-process runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Maximum accepted key length.
const MAX_KEY_LEN: usize = 512;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing blob atomically.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Delete `key`. Deleting a missing blob is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    async fn exists(&self, key: &str) -> Result<bool, BlobError>;
}

/// Validate a blob key: relative, slash-separated, no `..` segments.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = |reason| BlobError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    if key.trim().is_empty() {
        return Err(invalid("key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(invalid("key too long"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(invalid("key must be a relative slash-separated path"));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(invalid("key must not contain empty, '.' or '..' segments"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LocalBlobStore
// ---------------------------------------------------------------------------

/// Filesystem-backed blob store rooted at `base_path`.
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys starting with `prefix`, in lexical order.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        validate_key(key)?;
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        validate_key(key)?;
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        validate_key(key)?;
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        validate_key(key)?;
        Ok(self.blobs.read().await.contains_key(key))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("sessions/abc/images/000.png").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("sessions/../secrets").is_err());
        assert!(validate_key("sessions//x").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key(&"x".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn local_store_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        store.put("a/b/c.bin", vec![1, 2, 3]).await.unwrap();
        assert!(store.exists("a/b/c.bin").await.unwrap());
        assert_eq!(store.get("a/b/c.bin").await.unwrap(), vec![1, 2, 3]);

        store.put("a/b/c.bin", vec![9]).await.unwrap();
        assert_eq!(store.get("a/b/c.bin").await.unwrap(), vec![9]);

        store.delete("a/b/c.bin").await.unwrap();
        assert!(!store.exists("a/b/c.bin").await.unwrap());
        assert_matches!(store.get("a/b/c.bin").await, Err(BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn local_store_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.delete("never/written").await.is_ok());
    }

    #[tokio::test]
    async fn local_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.put("x/y.png", vec![0; 16]).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("x"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["y.png".to_string()]);
    }

    #[tokio::test]
    async fn local_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert_matches!(
            store.put("../escape", vec![]).await,
            Err(BlobError::InvalidKey { .. })
        );
    }

    #[tokio::test]
    async fn memory_store_lists_by_prefix() {
        let store = MemoryBlobStore::new();
        store.put("s/1/a", vec![1]).await.unwrap();
        store.put("s/1/b", vec![2]).await.unwrap();
        store.put("s/2/a", vec![3]).await.unwrap();

        assert_eq!(store.keys_with_prefix("s/1/").await, vec!["s/1/a", "s/1/b"]);
        store.delete("s/1/a").await.unwrap();
        assert_eq!(store.len().await, 2);
        assert_matches!(store.get("s/1/a").await, Err(BlobError::NotFound(_)));
    }
}
