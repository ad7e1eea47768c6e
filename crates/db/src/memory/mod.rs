//! In-memory [`SessionStore`](crate::SessionStore) and
//! [`JobQueue`](crate::JobQueue) implementations.
//!
//! A single `tokio::sync::Mutex` guards each backend's state, so every
//! trait method is one critical section, matching the row-lock semantics of
//! the Postgres repositories. Used by tests and single-process runs without
//! a database.

mod queue;
mod store;

pub use queue::MemoryJobQueue;
pub use store::MemoryStore;
