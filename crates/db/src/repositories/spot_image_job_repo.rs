//! Repository for the `spot_image_jobs` table: the job store behind the
//! spot-image generation pipeline.
//!
//! Lease acquisition is a single `UPDATE` wrapping a `SELECT ... FOR
//! UPDATE SKIP LOCKED` subquery, so the read and the mark are one
//! atomic step. Two concurrent callers can never lease the same row:
//! a row locked by one caller's subquery is skipped by the other's.
//!
//! Every method is a single statement and takes `impl PgExecutor`, so
//! callers may pass a pool, a connection, or an open transaction.

use sqlx::PgExecutor;
use waypoint_core::error::CoreError;
use waypoint_core::spot_jobs;
use waypoint_core::types::DbId;

use crate::models::spot_image_job::SpotImageJob;
use crate::models::status::{JobStatus, StatusId};

/// Column list for `spot_image_jobs` queries.
const COLUMNS: &str = "\
    id, plan_id, spot_name, status_id, attempts, max_attempts, \
    locked_by, locked_at, last_error, created_at, updated_at";

/// Error type for job-store operations that validate their input.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Provides the job-store operations for spot-image generation jobs.
pub struct SpotImageJobRepo;

impl SpotImageJobRepo {
    /// Insert one `queued` job per spot name that does not already have
    /// a row for this plan, in any status.
    ///
    /// Input names are de-duplicated preserving first-seen order;
    /// already-known (plan, spot) pairs are suppressed by the unique
    /// constraint. Returns the names actually inserted, so the caller
    /// can fan dispatch out over exactly the new jobs.
    ///
    /// Runs as one statement: passing an open transaction keeps job
    /// creation atomic with the caller's surrounding writes.
    pub async fn create_jobs(
        executor: impl PgExecutor<'_>,
        plan_id: &str,
        spot_names: &[String],
        max_attempts: i32,
    ) -> Result<Vec<String>, JobStoreError> {
        spot_jobs::validate_plan_id(plan_id)?;
        for name in spot_names {
            spot_jobs::validate_spot_name(name)?;
        }
        spot_jobs::validate_max_attempts(max_attempts)?;

        let unique = spot_jobs::dedupe_spot_names(spot_names);
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let inserted: Vec<String> = sqlx::query_scalar(
            "INSERT INTO spot_image_jobs (plan_id, spot_name, status_id, max_attempts) \
             SELECT $1, t.name, $2, $3 FROM UNNEST($4::text[]) AS t(name) \
             ON CONFLICT (plan_id, spot_name) DO NOTHING \
             RETURNING spot_name",
        )
        .bind(plan_id)
        .bind(JobStatus::Queued.id())
        .bind(max_attempts)
        .bind(&unique)
        .fetch_all(executor)
        .await?;

        Ok(inserted)
    }

    /// Atomically lease up to `limit` claimable jobs for `worker_id`.
    ///
    /// A row is claimable when it is queued, or when it is processing
    /// with a lease older than `stale_after_secs`. A processing row
    /// with a NULL `locked_at` is an inconsistent state treated as
    /// immediately abandoned. Selected rows are marked `processing`
    /// with a fresh lease in the same statement, oldest first; rows
    /// locked by a concurrent caller are skipped.
    pub async fn fetch_and_lock_jobs(
        executor: impl PgExecutor<'_>,
        limit: i64,
        worker_id: &str,
        stale_after_secs: i64,
    ) -> Result<Vec<SpotImageJob>, sqlx::Error> {
        let query = format!(
            "UPDATE spot_image_jobs \
             SET status_id = $1, locked_by = $2, locked_at = NOW(), updated_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM spot_image_jobs \
                 WHERE status_id = $3 \
                    OR (status_id = $1 \
                        AND (locked_at IS NULL \
                             OR locked_at < NOW() - make_interval(secs => $4))) \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT $5 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SpotImageJob>(&query)
            .bind(JobStatus::Processing.id())
            .bind(worker_id)
            .bind(JobStatus::Queued.id())
            .bind(stale_after_secs as f64)
            .bind(limit)
            .fetch_all(executor)
            .await
    }

    /// Single-job analogue of [`fetch_and_lock_jobs`](Self::fetch_and_lock_jobs),
    /// used by the push path.
    ///
    /// Leases the one job matching (plan, spot) if and only if it is
    /// currently claimable. `None` means a duplicate or late delivery:
    /// the caller treats it as a benign no-op, not an error.
    pub async fn claim_job(
        executor: impl PgExecutor<'_>,
        plan_id: &str,
        spot_name: &str,
        worker_id: &str,
        stale_after_secs: i64,
    ) -> Result<Option<SpotImageJob>, sqlx::Error> {
        let query = format!(
            "UPDATE spot_image_jobs \
             SET status_id = $1, locked_by = $2, locked_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM spot_image_jobs \
                 WHERE plan_id = $3 AND spot_name = $4 \
                   AND (status_id = $5 \
                        OR (status_id = $1 \
                            AND (locked_at IS NULL \
                                 OR locked_at < NOW() - make_interval(secs => $6)))) \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SpotImageJob>(&query)
            .bind(JobStatus::Processing.id())
            .bind(worker_id)
            .bind(plan_id)
            .bind(spot_name)
            .bind(JobStatus::Queued.id())
            .bind(stale_after_secs as f64)
            .fetch_optional(executor)
            .await
    }

    /// Transition a job to `succeeded` and clear its lease.
    ///
    /// Idempotent in effect: repeating the call on an already-succeeded
    /// job (e.g. after a stale-lease re-assignment) changes nothing of
    /// consequence.
    pub async fn mark_succeeded(
        executor: impl PgExecutor<'_>,
        job_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE spot_image_jobs \
             SET status_id = $2, locked_by = NULL, locked_at = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Succeeded.id())
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Record one failed execution attempt.
    ///
    /// Increments `attempts` and stores the error message. Below the
    /// retry ceiling the job goes back to `queued` (eligible for
    /// another lease); at the ceiling it becomes terminally `failed`.
    /// Returns the resulting row so callers can branch on terminality.
    pub async fn mark_failed(
        executor: impl PgExecutor<'_>,
        job_id: DbId,
        error_message: &str,
    ) -> Result<SpotImageJob, sqlx::Error> {
        let query = format!(
            "UPDATE spot_image_jobs \
             SET attempts = attempts + 1, \
                 status_id = CASE WHEN attempts + 1 >= max_attempts THEN $2 ELSE $3 END, \
                 last_error = $4, \
                 locked_by = NULL, locked_at = NULL, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SpotImageJob>(&query)
            .bind(job_id)
            .bind(JobStatus::Failed.id())
            .bind(JobStatus::Queued.id())
            .bind(error_message)
            .fetch_one(executor)
            .await
    }

    /// Explicit `failed -> queued` transition.
    ///
    /// Attempts are NOT reset: the ceiling stays absolute, so a single
    /// further failure terminates the job again. `None` means the job
    /// was not in `failed` (already requeued by someone else, or never
    /// terminal).
    pub async fn requeue_failed_job(
        executor: impl PgExecutor<'_>,
        job_id: DbId,
    ) -> Result<Option<SpotImageJob>, sqlx::Error> {
        let query = format!(
            "UPDATE spot_image_jobs \
             SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SpotImageJob>(&query)
            .bind(job_id)
            .bind(JobStatus::Queued.id())
            .bind(JobStatus::Failed.id())
            .fetch_optional(executor)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(
        executor: impl PgExecutor<'_>,
        id: DbId,
    ) -> Result<Option<SpotImageJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM spot_image_jobs WHERE id = $1");
        sqlx::query_as::<_, SpotImageJob>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// List all jobs for a plan in creation (dispatch) order.
    pub async fn list_for_plan(
        executor: impl PgExecutor<'_>,
        plan_id: &str,
    ) -> Result<Vec<SpotImageJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM spot_image_jobs \
             WHERE plan_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, SpotImageJob>(&query)
            .bind(plan_id)
            .fetch_all(executor)
            .await
    }

    /// Per-status job counts for a plan, for dashboards and tests.
    pub async fn count_by_status(
        executor: impl PgExecutor<'_>,
        plan_id: &str,
    ) -> Result<Vec<(StatusId, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (StatusId, i64)>(
            "SELECT status_id, COUNT(*) FROM spot_image_jobs \
             WHERE plan_id = $1 \
             GROUP BY status_id \
             ORDER BY status_id",
        )
        .bind(plan_id)
        .fetch_all(executor)
        .await
    }
}
