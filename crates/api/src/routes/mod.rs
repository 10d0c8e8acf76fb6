//! Route definitions.

pub mod health;
pub mod spot_image_tasks;

use axum::Router;

use crate::state::AppState;

/// Routes mounted under `/internal`.
pub fn internal_routes() -> Router<AppState> {
    Router::new().merge(spot_image_tasks::router())
}
