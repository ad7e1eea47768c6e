//! Session processing pipeline.
//!
//! - [`service::SessionService`]: request-side use cases (create, set
//!   parameters, submit, cancel, delete, task trace).
//! - [`dispatcher::JobDispatcher`]: the render loop run for each render job.
//! - [`archive::ArtifactArchiver`]: bundles output images into one zip.
//! - [`cascade::CascadeDeleter`]: removes a deleted session and its blobs.
//! - [`watchdog::StuckJobDetector`]: periodic sweep for sessions whose job died.
//! - [`runner::WorkerPool`]: polls the job queue and routes each job.

pub mod archive;
pub mod cascade;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod progress;
pub mod runner;
pub mod service;
pub mod watchdog;

pub use context::PipelineContext;
pub use error::JobError;
