//! Request handlers.

pub mod spot_image_tasks;
