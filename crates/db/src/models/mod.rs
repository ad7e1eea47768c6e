//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` row struct matching the database columns
//! - The domain struct the rest of the workspace uses
//! - Create DTOs for inserts

pub mod job;
pub mod output_image;
pub mod parameters;
pub mod session;
pub mod status;
