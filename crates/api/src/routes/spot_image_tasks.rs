//! Route definitions for spot-image task delivery and inspection.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::spot_image_tasks;
use crate::state::AppState;

/// Routes mounted at `/internal`.
///
/// ```text
/// POST   /tasks/spot-image                   -> run_spot_image_task
/// GET    /plans/{plan_id}/spot-image-jobs    -> list_plan_jobs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/tasks/spot-image",
            post(spot_image_tasks::run_spot_image_task),
        )
        .route(
            "/plans/{plan_id}/spot-image-jobs",
            get(spot_image_tasks::list_plan_jobs),
        )
}
