//! Volume loading.
//!
//! Parsing voxel data is the render backend's job. The loader here checks
//! that the uploaded bytes look like the declared format and wraps them in
//! a shareable [`Volume`].

use std::sync::Arc;

use async_trait::async_trait;
use xraygen_core::volume::VolumeFormat;

use crate::error::RenderError;

/// A loaded input volume, ready to hand to a renderer factory.
#[derive(Debug, Clone)]
pub struct Volume {
    pub format: VolumeFormat,
    pub bytes: Arc<Vec<u8>>,
}

impl Volume {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
pub trait VolumeLoader: Send + Sync {
    async fn load(&self, bytes: Vec<u8>, format: VolumeFormat) -> Result<Volume, RenderError>;
}

/// Accepts a volume when its magic bytes agree with the declared format.
///
/// Inputs that cannot be sniffed (compressed NIfTI, detached NRRD data)
/// are passed through under the declared format.
#[derive(Debug, Default, Clone, Copy)]
pub struct SniffingVolumeLoader;

#[async_trait]
impl VolumeLoader for SniffingVolumeLoader {
    async fn load(&self, bytes: Vec<u8>, format: VolumeFormat) -> Result<Volume, RenderError> {
        if bytes.is_empty() {
            return Err(RenderError::UnsupportedVolume("volume is empty".into()));
        }
        match VolumeFormat::sniff(&bytes) {
            Some(detected) if detected != format => Err(RenderError::UnsupportedVolume(format!(
                "declared {format} but content looks like {detected}"
            ))),
            _ => Ok(Volume {
                format,
                bytes: Arc::new(bytes),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn accepts_matching_format() {
        let volume = SniffingVolumeLoader
            .load(b"NRRD0004\ntype: short\n".to_vec(), VolumeFormat::Nrrd)
            .await
            .unwrap();
        assert_eq!(volume.format, VolumeFormat::Nrrd);
        assert_eq!(volume.len(), 21);
    }

    #[tokio::test]
    async fn rejects_mismatched_format() {
        let result = SniffingVolumeLoader
            .load(b"NRRD0004\n".to_vec(), VolumeFormat::Dicom)
            .await;
        assert_matches!(result, Err(RenderError::UnsupportedVolume(_)));
    }

    #[tokio::test]
    async fn passes_through_unrecognised_content() {
        let gz = vec![0x1f, 0x8b, 0x08, 0x00];
        let volume = SniffingVolumeLoader
            .load(gz, VolumeFormat::Nifti)
            .await
            .unwrap();
        assert_eq!(volume.format, VolumeFormat::Nifti);
    }

    #[tokio::test]
    async fn rejects_empty_volume() {
        assert!(SniffingVolumeLoader
            .load(Vec::new(), VolumeFormat::Nrrd)
            .await
            .is_err());
    }
}
