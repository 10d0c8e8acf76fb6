//! Job Producer: fans spot-image work out of the guide-generation flow.

use sqlx::PgConnection;
use waypoint_core::spot_jobs;
use waypoint_db::repositories::{JobStoreError, SpotImageJobRepo};

use crate::dispatch::{DispatchRequest, JobDispatcher};

/// Create job rows for every spot needing an image, then dispatch each
/// newly created job.
///
/// Runs on the caller's connection so the guide-generation workflow can
/// hold an open transaction around it: if job creation fails, the error
/// propagates and the whole transaction rolls back, leaving no jobs for
/// a guide that was never persisted.
///
/// Dispatch happens synchronously, once per created job, with the job's
/// deterministic idempotency key. A dispatch failure is logged and does
/// not unwind creation: the row is already queued, and the polling path
/// or a later re-dispatch picks it up.
///
/// Returns the number of jobs newly queued (spots that already had a
/// job row are suppressed).
pub async fn queue_spot_images(
    conn: &mut PgConnection,
    dispatcher: &dyn JobDispatcher,
    plan_id: &str,
    spot_names: &[String],
    max_attempts: i32,
) -> Result<u64, JobStoreError> {
    let created =
        SpotImageJobRepo::create_jobs(&mut *conn, plan_id, spot_names, max_attempts).await?;

    for spot_name in &created {
        let idempotency_key = spot_jobs::job_idempotency_key(plan_id, spot_name);
        let request = DispatchRequest {
            plan_id,
            spot_name,
            idempotency_key: Some(&idempotency_key),
            target_url: None,
        };
        if let Err(e) = dispatcher.enqueue(&request).await {
            tracing::error!(
                plan_id,
                spot_name,
                error = %e,
                "Spot-image dispatch failed; job stays queued for pickup",
            );
        }
    }

    if !created.is_empty() {
        tracing::info!(plan_id, queued = created.len(), "Spot-image jobs queued");
    }
    Ok(created.len() as u64)
}
