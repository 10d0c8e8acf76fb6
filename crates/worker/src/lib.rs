//! Polling execution path for spot-image generation jobs.

pub mod poller;

pub use poller::{JobPoller, PollerConfig};
