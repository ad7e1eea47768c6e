//! Rendering collaborators of the session pipeline.
//!
//! - [`volume`]: loading an uploaded scan into a [`Volume`].
//! - [`renderer`]: the projection renderer seam and [`RawProjection`].
//! - [`http`]: client for an out-of-process render service.
//! - [`synthetic`]: deterministic in-process renderer for local runs and tests.
//! - [`codec`]: PNG encoding of primary images and thumbnails.

pub mod codec;
pub mod error;
pub mod http;
pub mod renderer;
pub mod synthetic;
pub mod volume;

pub use codec::{CodecError, ImageCodec, PngCodec};
pub use error::RenderError;
pub use renderer::{ProjectionRenderer, RawProjection, RendererFactory};
pub use volume::{SniffingVolumeLoader, Volume, VolumeLoader};
