//! Deterministic in-process renderer.
//!
//! Produces a smooth intensity field whose shape depends on every pose
//! component, so different poses give different images. Used for local
//! runs without a render service and by pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use xraygen_core::parameters::DeviceGeometry;
use xraygen_core::sampler::Pose;

use crate::error::RenderError;
use crate::renderer::{ProjectionRenderer, RawProjection, RendererFactory};
use crate::volume::Volume;

pub const DEFAULT_SIZE: u32 = 64;

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    created: AtomicUsize,
    rendered: AtomicUsize,
}

/// Factory for [`SyntheticRenderer`] contexts.
#[derive(Clone)]
pub struct SyntheticRendererFactory {
    width: u32,
    height: u32,
    counters: Arc<Counters>,
}

impl SyntheticRendererFactory {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            counters: Arc::default(),
        }
    }

    /// Contexts created and not yet released.
    pub fn live_contexts(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn projections_rendered(&self) -> usize {
        self.counters.rendered.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticRendererFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE, DEFAULT_SIZE)
    }
}

#[async_trait]
impl RendererFactory for SyntheticRendererFactory {
    async fn create(
        &self,
        volume: Arc<Volume>,
        geometry: DeviceGeometry,
    ) -> Result<Box<dyn ProjectionRenderer>, RenderError> {
        if volume.is_empty() {
            return Err(RenderError::UnsupportedVolume("volume is empty".into()));
        }
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticRenderer {
            width: self.width,
            height: self.height,
            geometry,
            counters: self.counters.clone(),
            released: false,
        }))
    }
}

pub struct SyntheticRenderer {
    width: u32,
    height: u32,
    geometry: DeviceGeometry,
    counters: Arc<Counters>,
    released: bool,
}

impl SyntheticRenderer {
    fn intensity(&self, pose: &Pose, x: u32, y: u32) -> f32 {
        let u = x as f64 / self.width as f64 - 0.5 + pose.push_pull / self.geometry.detector_diameter;
        let v = y as f64 / self.height as f64 - 0.5 + pose.head_foot / self.geometry.detector_diameter;
        let scale = 1.0 + pose.raise_lower / self.geometry.source_to_detector_distance;
        let (sa, ca) = pose.alpha.to_radians().sin_cos();
        let (sb, cb) = pose.beta.to_radians().sin_cos();
        let r = (u * ca - v * sa) * scale;
        // Elliptical footprint so in-plane rotation changes the image.
        let s = (u * sa + v * ca) * scale * 2.0 * cb.abs().max(0.1) + sb * 0.25;
        (1.0 - (r * r + s * s).sqrt()).max(0.0) as f32 * 1000.0
    }
}

#[async_trait]
impl ProjectionRenderer for SyntheticRenderer {
    async fn render(&mut self, pose: &Pose) -> Result<RawProjection, RenderError> {
        if self.released {
            return Err(RenderError::Released);
        }
        let pixels = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .map(|(x, y)| self.intensity(pose, x, y))
            .collect();
        self.counters.rendered.fetch_add(1, Ordering::SeqCst);
        Ok(RawProjection {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    async fn release(&mut self) -> Result<(), RenderError> {
        if !self.released {
            self.released = true;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
