//! Projection renderer seam.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use xraygen_core::parameters::DeviceGeometry;
use xraygen_core::sampler::Pose;

use crate::error::RenderError;
use crate::volume::Volume;

/// Raw detector intensities, row-major, one value per pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProjection {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f32>,
}

impl RawProjection {
    /// Check that the pixel buffer matches the dimensions.
    pub fn validate(&self) -> Result<(), RenderError> {
        let expected = self.width as usize * self.height as usize;
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidProjection(format!(
                "empty projection {}x{}",
                self.width, self.height
            )));
        }
        if self.pixels.len() != expected {
            return Err(RenderError::InvalidProjection(format!(
                "{}x{} projection carries {} pixels, expected {expected}",
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

/// Creates one render context per job.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn create(
        &self,
        volume: Arc<Volume>,
        geometry: DeviceGeometry,
    ) -> Result<Box<dyn ProjectionRenderer>, RenderError>;
}

/// A render context bound to one volume and device geometry.
///
/// Contexts hold scarce accelerator resources. Callers must call
/// [`release`](ProjectionRenderer::release) on every exit path; rendering
/// after release fails with [`RenderError::Released`].
#[async_trait]
pub trait ProjectionRenderer: Send {
    async fn render(&mut self, pose: &Pose) -> Result<RawProjection, RenderError>;

    async fn release(&mut self) -> Result<(), RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_checks_pixel_count() {
        let ok = RawProjection {
            width: 2,
            height: 3,
            pixels: vec![0.0; 6],
        };
        assert!(ok.validate().is_ok());

        let short = RawProjection {
            pixels: vec![0.0; 5],
            ..ok.clone()
        };
        assert!(short.validate().is_err());

        let empty = RawProjection {
            width: 0,
            height: 3,
            pixels: vec![],
        };
        assert!(empty.validate().is_err());
    }
}
