//! Generation-side boundaries of the spot-image job system.
//!
//! - [`generator`] -- the execution boundary: one call that produces and
//!   stores the image for a (plan, spot) pair.
//! - [`dispatch`] -- the hand-off strategy: push a task to an external
//!   queue, or do nothing and let the polling worker find the job.
//! - [`producer`] -- the guide-generation entry point that creates job
//!   rows and fans dispatch out over them.

pub mod dispatch;
pub mod generator;
pub mod producer;
