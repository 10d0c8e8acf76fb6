//! Job dispatch strategies.
//!
//! One interface, two implementations selected by configuration at
//! startup: [`PushQueueDispatcher`] hands a job to the external
//! push-based task queue, [`NullDispatcher`] does nothing because a
//! polling worker will find the job on its own. Call sites never
//! branch on the mode.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use waypoint_core::spot_jobs;

/// One job hand-off to a dispatch strategy.
#[derive(Debug)]
pub struct DispatchRequest<'a> {
    pub plan_id: &'a str,
    pub spot_name: &'a str,
    /// When present, the push queue creates the task under a
    /// deterministic name derived from this key and rejects duplicate
    /// submissions itself.
    pub idempotency_key: Option<&'a str>,
    /// Delivery URL override; defaults to the configured target.
    pub target_url: Option<&'a str>,
}

/// Errors from a dispatch strategy.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Queue request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Queue rejected task submission: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Hands newly created jobs to an execution path.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn enqueue(&self, request: &DispatchRequest<'_>) -> Result<(), DispatchError>;
}

// ---------------------------------------------------------------------------
// Strategy selection
// ---------------------------------------------------------------------------

/// How jobs reach an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Submit every job to the external push queue.
    Push,
    /// Rely on the polling worker; dispatch is a no-op.
    Polling,
}

impl DispatchMode {
    /// Parse from the `DISPATCH_MODE` environment variable.
    ///
    /// Accepts `push` or `polling` (default). Panics on anything else:
    /// a half-configured dispatch path should fail at startup.
    pub fn from_env() -> Self {
        match std::env::var("DISPATCH_MODE").as_deref() {
            Ok("push") => DispatchMode::Push,
            Ok("polling") | Err(_) => DispatchMode::Polling,
            Ok(other) => panic!("DISPATCH_MODE must be 'push' or 'polling', got '{other}'"),
        }
    }
}

/// Build the configured dispatcher.
pub fn dispatcher_from_env() -> Arc<dyn JobDispatcher> {
    match DispatchMode::from_env() {
        DispatchMode::Push => Arc::new(PushQueueDispatcher::new(PushQueueConfig::from_env())),
        DispatchMode::Polling => Arc::new(NullDispatcher),
    }
}

// ---------------------------------------------------------------------------
// Push queue
// ---------------------------------------------------------------------------

/// Connection settings for the external push queue service.
#[derive(Debug, Clone)]
pub struct PushQueueConfig {
    /// Task-creation endpoint of the queue service.
    pub queue_url: String,
    /// Name of the queue tasks are submitted to. The push handler
    /// checks delivered tasks against the same name.
    pub queue_name: String,
    /// URL the queue delivers tasks to (the push handler endpoint).
    pub target_url: String,
}

impl PushQueueConfig {
    /// Load from environment variables.
    ///
    /// | Env Var                | Default                  |
    /// |------------------------|--------------------------|
    /// | `TASK_QUEUE_URL`       | required                 |
    /// | `TASK_QUEUE_NAME`      | `spot-image-generation`  |
    /// | `TASK_PUSH_TARGET_URL` | required                 |
    pub fn from_env() -> Self {
        let queue_url = std::env::var("TASK_QUEUE_URL").expect("TASK_QUEUE_URL must be set");
        let queue_name = std::env::var("TASK_QUEUE_NAME")
            .unwrap_or_else(|_| "spot-image-generation".to_string());
        let target_url =
            std::env::var("TASK_PUSH_TARGET_URL").expect("TASK_PUSH_TARGET_URL must be set");
        Self {
            queue_url,
            queue_name,
            target_url,
        }
    }
}

/// Dispatcher that submits tasks to the external push queue.
pub struct PushQueueDispatcher {
    http: reqwest::Client,
    config: PushQueueConfig,
}

impl PushQueueDispatcher {
    pub fn new(config: PushQueueConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl JobDispatcher for PushQueueDispatcher {
    async fn enqueue(&self, request: &DispatchRequest<'_>) -> Result<(), DispatchError> {
        let target_url = request.target_url.unwrap_or(&self.config.target_url);
        let task_name = request.idempotency_key.map(spot_jobs::derive_task_name);

        let body = serde_json::json!({
            "queue": self.config.queue_name,
            "task": {
                "name": task_name,
                "url": target_url,
                "payload": {
                    "plan_id": request.plan_id,
                    "spot_name": request.spot_name,
                },
            },
        });

        let response = self
            .http
            .post(&self.config.queue_url)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            // The queue already holds a task under this name; the
            // earlier submission wins.
            tracing::debug!(
                plan_id = request.plan_id,
                spot_name = request.spot_name,
                "Duplicate task submission rejected by queue; treating as enqueued",
            );
            return Ok(());
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(
            plan_id = request.plan_id,
            spot_name = request.spot_name,
            queue = %self.config.queue_name,
            "Task submitted to push queue",
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Null dispatcher
// ---------------------------------------------------------------------------

/// No-op dispatcher for polling-only deployments.
pub struct NullDispatcher;

#[async_trait]
impl JobDispatcher for NullDispatcher {
    async fn enqueue(&self, request: &DispatchRequest<'_>) -> Result<(), DispatchError> {
        // The job row is already queued; the polling worker leases it
        // on its next cycle.
        tracing::trace!(
            plan_id = request.plan_id,
            spot_name = request.spot_name,
            "No push queue configured; job left for polling worker",
        );
        Ok(())
    }
}
