//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept a `PgExecutor` as the first argument.

pub mod spot_image_job_repo;

pub use spot_image_job_repo::{JobStoreError, SpotImageJobRepo};
