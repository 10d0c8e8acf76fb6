//! Integration tests for the polling worker's lease/execute/report cycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use waypoint_db::models::status::JobStatus;
use waypoint_db::repositories::SpotImageJobRepo;
use waypoint_pipeline::generator::{GenerateError, SpotImageGenerator, SpotImageOutcome};
use waypoint_worker::{JobPoller, PollerConfig};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Generator double that fails for a fixed set of spot names and counts
/// every call.
struct ScriptedGenerator {
    fail_spots: HashSet<String>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(fail_spots: &[&str]) -> Self {
        Self {
            fail_spots: fail_spots.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpotImageGenerator for ScriptedGenerator {
    async fn generate_for_spot(
        &self,
        plan_id: &str,
        spot_name: &str,
    ) -> Result<SpotImageOutcome, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_spots.contains(spot_name) {
            return Err(GenerateError::Failed("scripted failure".to_string()));
        }
        Ok(SpotImageOutcome {
            image_reference: format!("images/{plan_id}/{spot_name}.png"),
        })
    }
}

fn test_config(concurrency: usize) -> PollerConfig {
    PollerConfig {
        concurrency,
        poll_interval: Duration::from_millis(10),
        stale_after_secs: 600,
        worker_id: "poller-test".to_string(),
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn status_of(pool: &PgPool, plan_id: &str, spot: &str) -> JobStatus {
    let jobs = SpotImageJobRepo::list_for_plan(pool, plan_id).await.unwrap();
    jobs.iter()
        .find(|j| j.spot_name == spot)
        .unwrap()
        .status()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn cycle_executes_whole_batch_and_reports_outcomes(pool: PgPool) {
    SpotImageJobRepo::create_jobs(&pool, "p1", &names(&["A", "B", "C"]), 3)
        .await
        .unwrap();

    let generator = Arc::new(ScriptedGenerator::new(&["B"]));
    let poller = JobPoller::new(pool.clone(), generator.clone(), test_config(8));

    let leased = poller.run_cycle().await.unwrap();
    assert_eq!(leased, 3);
    assert_eq!(generator.calls(), 3);

    // One failing job never aborts its siblings.
    assert_eq!(status_of(&pool, "p1", "A").await, JobStatus::Succeeded);
    assert_eq!(status_of(&pool, "p1", "B").await, JobStatus::Queued);
    assert_eq!(status_of(&pool, "p1", "C").await, JobStatus::Succeeded);
}

#[sqlx::test(migrations = "../../migrations")]
async fn cycle_batch_is_bounded_by_concurrency(pool: PgPool) {
    SpotImageJobRepo::create_jobs(&pool, "p1", &names(&["A", "B", "C"]), 3)
        .await
        .unwrap();

    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let poller = JobPoller::new(pool.clone(), generator.clone(), test_config(2));

    // First cycle takes two jobs, second takes the remaining one.
    assert_eq!(poller.run_cycle().await.unwrap(), 2);
    assert_eq!(poller.run_cycle().await.unwrap(), 1);
    assert_eq!(poller.run_cycle().await.unwrap(), 0);
    assert_eq!(generator.calls(), 3);
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_jobs_are_retried_on_a_later_cycle(pool: PgPool) {
    SpotImageJobRepo::create_jobs(&pool, "p1", &names(&["A"]), 2)
        .await
        .unwrap();

    let generator = Arc::new(ScriptedGenerator::new(&["A"]));
    let poller = JobPoller::new(pool.clone(), generator.clone(), test_config(4));

    // First cycle: attempt 1 of 2, requeued.
    poller.run_cycle().await.unwrap();
    assert_eq!(status_of(&pool, "p1", "A").await, JobStatus::Queued);

    // Second cycle: attempt 2 of 2, terminal.
    poller.run_cycle().await.unwrap();
    assert_eq!(status_of(&pool, "p1", "A").await, JobStatus::Failed);

    // Third cycle: nothing left to lease.
    assert_eq!(poller.run_cycle().await.unwrap(), 0);
    assert_eq!(generator.calls(), 2);

    let jobs = SpotImageJobRepo::list_for_plan(&pool, "p1").await.unwrap();
    assert_eq!(jobs[0].attempts, 2);
    assert_eq!(jobs[0].last_error.as_deref(), Some("Generation failed: scripted failure"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn idle_cycle_is_a_no_op(pool: PgPool) {
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let poller = JobPoller::new(pool.clone(), generator.clone(), test_config(4));

    assert_eq!(poller.run_cycle().await.unwrap(), 0);
    assert_eq!(generator.calls(), 0);
}
