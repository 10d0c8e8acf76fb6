//! Polling worker: lease a batch, execute it, report each outcome.
//!
//! A single long-lived loop. Each cycle leases up to `concurrency`
//! claimable jobs with one atomic store call, then executes them
//! concurrently under a semaphore of the same size. Outcomes are
//! reported per job as they resolve, never batched.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use waypoint_core::spot_jobs;
use waypoint_db::models::spot_image_job::SpotImageJob;
use waypoint_db::repositories::SpotImageJobRepo;
use waypoint_pipeline::generator::SpotImageGenerator;

/// Tunables for the polling loop.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Batch size and concurrent-execution bound.
    pub concurrency: usize,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Leases older than this are presumed abandoned.
    pub stale_after_secs: i64,
    /// Lease label for this process.
    pub worker_id: String,
}

impl PollerConfig {
    /// Load from environment variables with defaults.
    ///
    /// | Env Var                | Default |
    /// |------------------------|---------|
    /// | `WORKER_CONCURRENCY`   | `4`     |
    /// | `POLL_INTERVAL_SECS`   | `5`     |
    /// | `JOB_STALE_AFTER_SECS` | `600`   |
    pub fn from_env() -> Self {
        let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| spot_jobs::DEFAULT_WORKER_CONCURRENCY.to_string())
            .parse()
            .expect("WORKER_CONCURRENCY must be a valid usize");

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| spot_jobs::DEFAULT_POLL_INTERVAL_SECS.to_string())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        let stale_after_secs: i64 = std::env::var("JOB_STALE_AFTER_SECS")
            .unwrap_or_else(|_| spot_jobs::DEFAULT_STALE_AFTER_SECS.to_string())
            .parse()
            .expect("JOB_STALE_AFTER_SECS must be a valid i64");

        Self {
            concurrency,
            poll_interval: Duration::from_secs(poll_interval_secs),
            stale_after_secs,
            worker_id: spot_jobs::worker_identity(),
        }
    }
}

/// Long-running polling worker for spot-image jobs.
pub struct JobPoller {
    pool: PgPool,
    generator: Arc<dyn SpotImageGenerator>,
    config: PollerConfig,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    pub fn new(pool: PgPool, generator: Arc<dyn SpotImageGenerator>, config: PollerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            pool,
            generator,
            config,
            semaphore,
        }
    }

    /// Run the poll loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        tracing::info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Spot-image poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Spot-image poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(0) => tracing::trace!("Poll cycle found no claimable jobs"),
                        Ok(leased) => tracing::debug!(leased, "Poll cycle completed"),
                        Err(e) => tracing::error!(error = %e, "Poll cycle failed"),
                    }
                }
            }
        }
    }

    /// One poll cycle: lease a batch and execute it to completion.
    ///
    /// Returns the number of jobs leased. A failure inside one job
    /// never aborts its siblings; only the lease query itself can
    /// error out of this method.
    pub async fn run_cycle(&self) -> Result<usize, sqlx::Error> {
        let batch = SpotImageJobRepo::fetch_and_lock_jobs(
            &self.pool,
            self.config.concurrency as i64,
            &self.config.worker_id,
            self.config.stale_after_secs,
        )
        .await?;

        if batch.is_empty() {
            return Ok(0);
        }
        let leased = batch.len();

        let mut tasks = JoinSet::new();
        for job in batch {
            let semaphore = Arc::clone(&self.semaphore);
            let pool = self.pool.clone();
            let generator = Arc::clone(&self.generator);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    // Closed only during shutdown; the lease goes stale
                    // and another holder picks the job up.
                    return;
                };
                execute_leased_job(&pool, generator.as_ref(), &job).await;
            });
        }
        while tasks.join_next().await.is_some() {}

        Ok(leased)
    }
}

/// Execute one leased job and record its outcome.
///
/// The generation call is the only long-latency operation. If the
/// bookkeeping call that records the outcome fails, the error is only
/// logged: the lease goes stale and the job becomes claimable again.
async fn execute_leased_job(pool: &PgPool, generator: &dyn SpotImageGenerator, job: &SpotImageJob) {
    match generator.generate_for_spot(&job.plan_id, &job.spot_name).await {
        Ok(outcome) => {
            tracing::info!(
                job_id = job.id,
                plan_id = %job.plan_id,
                spot_name = %job.spot_name,
                image = %outcome.image_reference,
                "Spot image generated",
            );
            if let Err(e) = SpotImageJobRepo::mark_succeeded(pool, job.id).await {
                tracing::error!(
                    job_id = job.id,
                    error = %e,
                    "Failed to record success; job will be retried after lease expiry",
                );
            }
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(
                job_id = job.id,
                plan_id = %job.plan_id,
                spot_name = %job.spot_name,
                error = %message,
                "Spot image generation failed",
            );
            match SpotImageJobRepo::mark_failed(pool, job.id, &message).await {
                Ok(updated) if updated.is_terminal() => {
                    tracing::error!(
                        job_id = job.id,
                        attempts = updated.attempts,
                        "Spot-image job exhausted its retries",
                    );
                }
                Ok(_) => {
                    // Requeued; a later lease retries it.
                }
                Err(e) => {
                    tracing::error!(
                        job_id = job.id,
                        error = %e,
                        "Failed to record failure; job will be retried after lease expiry",
                    );
                }
            }
        }
    }
}
