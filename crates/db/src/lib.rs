//! Persistence for sessions, input parameters, output images and jobs.
//!
//! Two seams are exposed as traits so the pipeline can run against either
//! backend:
//!
//! - [`SessionStore`]: session rows, parameters, outputs and the guarded
//!   status transitions (each one a single locked critical section).
//! - [`JobQueue`]: `enqueue` / `claim_next` / `acknowledge` / `fail`.
//!
//! Postgres implementations ([`PgSessionStore`], [`PgJobQueue`]) delegate to
//! the zero-sized repositories in [`repositories`]; in-memory
//! implementations live in [`memory`].

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use memory::{MemoryJobQueue, MemoryStore};
pub use store::{JobQueue, PgJobQueue, PgSessionStore, SessionStore};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations under `migrations/`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
