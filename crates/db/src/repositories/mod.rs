//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query functions
//! that accept `&PgPool` as the first argument. Status transitions run in a
//! transaction that locks the session row with `SELECT ... FOR UPDATE`.

pub mod job_repo;
pub mod output_image_repo;
pub mod parameters_repo;
pub mod session_repo;

pub use job_repo::JobRepo;
pub use output_image_repo::OutputImageRepo;
pub use parameters_repo::InputParametersRepo;
pub use session_repo::SessionRepo;
