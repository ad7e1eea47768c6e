//! Domain building blocks for the xraygen batch projection pipeline.
//!
//! Everything in this crate is free of database and network concerns:
//! identifiers, error types, session statuses and their transition rules,
//! input parameter validation, the pose sampler, the stuck-session
//! heuristic, event type names, and the blob storage abstraction.

pub mod blob_keys;
pub mod error;
pub mod parameters;
pub mod sampler;
pub mod session;
pub mod session_events;
pub mod storage;
pub mod stuck;
pub mod types;
pub mod volume;
