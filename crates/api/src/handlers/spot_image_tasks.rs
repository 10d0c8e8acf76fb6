//! Push-delivery handler for spot-image generation tasks.
//!
//! The external task queue calls `POST /internal/tasks/spot-image` once
//! per delivered task. Queue identity arrives in transport headers and
//! is verified before any job-store mutation. Claiming is atomic and
//! keyed, so duplicate or late deliveries degrade to a "skipped"
//! response rather than double execution.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use waypoint_core::error::CoreError;
use waypoint_core::spot_jobs;
use waypoint_db::repositories::SpotImageJobRepo;
use waypoint_pipeline::dispatch::DispatchRequest;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Header carrying the delivering queue's name.
pub const QUEUE_NAME_HEADER: &str = "x-queue-name";
/// Header carrying the delivering task's name.
pub const QUEUE_TASK_HEADER: &str = "x-queue-task";

/// Payload of one delivered task.
#[derive(Debug, Deserialize)]
pub struct SpotImageTask {
    pub plan_id: String,
    pub spot_name: String,
}

/// What the handler did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// No claimable job existed: duplicate or late delivery.
    Skipped,
    /// The image was generated and recorded.
    Succeeded,
    /// The job went terminal here but was put back in the queue with a
    /// fresh task.
    Requeued,
}

/// Response body for the push endpoint.
#[derive(Debug, Serialize)]
pub struct TaskResult {
    pub outcome: TaskOutcome,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /internal/tasks/spot-image
///
/// Execute one delivered spot-image task. Responds 500 on a retryable
/// failure so the queue's own retry policy redelivers; a job that went
/// terminal here is requeued and re-dispatched under a fresh
/// idempotency key instead, closing the gap between the queue's retry
/// budget and the job's `max_attempts`.
pub async fn run_spot_image_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(task): Json<SpotImageTask>,
) -> AppResult<impl IntoResponse> {
    authorize_queue(&headers, &state.config.push_queue_name)?;

    spot_jobs::validate_plan_id(&task.plan_id)?;
    spot_jobs::validate_spot_name(&task.spot_name)?;

    let claimed = SpotImageJobRepo::claim_job(
        &state.pool,
        &task.plan_id,
        &task.spot_name,
        &state.worker_id,
        state.config.stale_after_secs,
    )
    .await?;

    let Some(job) = claimed else {
        tracing::debug!(
            plan_id = %task.plan_id,
            spot_name = %task.spot_name,
            "No claimable job for delivered task; skipping",
        );
        return Ok(Json(DataResponse {
            data: TaskResult {
                outcome: TaskOutcome::Skipped,
            },
        }));
    };

    match state
        .generator
        .generate_for_spot(&job.plan_id, &job.spot_name)
        .await
    {
        Ok(outcome) => {
            SpotImageJobRepo::mark_succeeded(&state.pool, job.id).await?;
            tracing::info!(
                job_id = job.id,
                plan_id = %job.plan_id,
                spot_name = %job.spot_name,
                image = %outcome.image_reference,
                "Spot image generated via push delivery",
            );
            Ok(Json(DataResponse {
                data: TaskResult {
                    outcome: TaskOutcome::Succeeded,
                },
            }))
        }
        Err(e) => {
            let message = e.to_string();
            let updated = SpotImageJobRepo::mark_failed(&state.pool, job.id, &message).await?;

            if !updated.is_terminal() {
                // Still under the ceiling: surface a server error so the
                // queue redelivers this task.
                tracing::warn!(
                    job_id = job.id,
                    attempts = updated.attempts,
                    max_attempts = updated.max_attempts,
                    error = %message,
                    "Spot image generation failed; leaving retry to the queue",
                );
                return Err(AppError::InternalError(format!(
                    "Spot image generation failed (attempt {} of {}): {message}",
                    updated.attempts, updated.max_attempts
                )));
            }

            // The queue's retry budget ran out before ours did: put the
            // job back and hand the queue a fresh task.
            let requeued = SpotImageJobRepo::requeue_failed_job(&state.pool, job.id).await?;
            if requeued.is_none() {
                // Another holder already moved the job on; nothing to
                // re-dispatch.
                tracing::debug!(job_id = job.id, "Job already requeued elsewhere");
                return Ok(Json(DataResponse {
                    data: TaskResult {
                        outcome: TaskOutcome::Requeued,
                    },
                }));
            }

            let idempotency_key = spot_jobs::fresh_idempotency_key();
            let request = DispatchRequest {
                plan_id: &job.plan_id,
                spot_name: &job.spot_name,
                idempotency_key: Some(&idempotency_key),
                target_url: None,
            };
            state
                .dispatcher
                .enqueue(&request)
                .await
                .map_err(|e| AppError::InternalError(format!("Re-dispatch failed: {e}")))?;

            tracing::warn!(
                job_id = job.id,
                attempts = updated.attempts,
                error = %message,
                "Spot-image job requeued with a fresh task",
            );
            Ok(Json(DataResponse {
                data: TaskResult {
                    outcome: TaskOutcome::Requeued,
                },
            }))
        }
    }
}

/// GET /internal/plans/{plan_id}/spot-image-jobs
///
/// List a plan's spot-image jobs in dispatch order.
pub async fn list_plan_jobs(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let jobs = SpotImageJobRepo::list_for_plan(&state.pool, &plan_id).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Queue authorization
// ---------------------------------------------------------------------------

/// Verify the request actually originates from the configured queue.
///
/// Rejects before any job-store mutation when the queue name does not
/// match or the task name is missing.
fn authorize_queue(headers: &HeaderMap, expected_queue: &str) -> Result<(), AppError> {
    let queue = headers
        .get(QUEUE_NAME_HEADER)
        .and_then(|v| v.to_str().ok());
    let task = headers
        .get(QUEUE_TASK_HEADER)
        .and_then(|v| v.to_str().ok());

    match (queue, task) {
        (Some(queue), Some(task)) if queue == expected_queue && !task.is_empty() => Ok(()),
        _ => {
            tracing::warn!(
                queue = queue.unwrap_or("<missing>"),
                "Rejected task delivery that is not from the configured queue",
            );
            Err(AppError::Core(CoreError::Forbidden(
                "Request is not from the configured task queue".to_string(),
            )))
        }
    }
}
