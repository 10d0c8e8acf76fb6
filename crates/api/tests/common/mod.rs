#![allow(dead_code)]

//! Shared test harness: full application router with injectable
//! generator and dispatcher doubles.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use waypoint_api::config::ServerConfig;
use waypoint_api::routes;
use waypoint_api::state::AppState;
use waypoint_pipeline::dispatch::{DispatchError, DispatchRequest, JobDispatcher};
use waypoint_pipeline::generator::{GenerateError, SpotImageGenerator, SpotImageOutcome};

/// Queue name the test configuration accepts deliveries from.
pub const TEST_QUEUE: &str = "spot-image-generation-test";

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

/// Generator double that fails for a fixed set of spot names.
pub struct ScriptedGenerator {
    fail_spots: HashSet<String>,
}

impl ScriptedGenerator {
    pub fn succeeding() -> Self {
        Self::failing_for(&[])
    }

    pub fn failing_for(spots: &[&str]) -> Self {
        Self {
            fail_spots: spots.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl SpotImageGenerator for ScriptedGenerator {
    async fn generate_for_spot(
        &self,
        plan_id: &str,
        spot_name: &str,
    ) -> Result<SpotImageOutcome, GenerateError> {
        if self.fail_spots.contains(spot_name) {
            return Err(GenerateError::Failed("scripted failure".to_string()));
        }
        Ok(SpotImageOutcome {
            image_reference: format!("images/{plan_id}/{spot_name}.png"),
        })
    }
}

/// One recorded `enqueue` call.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub plan_id: String,
    pub spot_name: String,
    pub idempotency_key: Option<String>,
}

/// Dispatcher double that records every call.
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<Recorded>>,
}

impl RecordingDispatcher {
    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn enqueue(&self, request: &DispatchRequest<'_>) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(Recorded {
            plan_id: request.plan_id.to_string(),
            spot_name: request.spot_name.to_string(),
            idempotency_key: request.idempotency_key.map(str::to_string),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        push_queue_name: TEST_QUEUE.to_string(),
        stale_after_secs: 600,
    }
}

/// Build the full application router with all middleware layers, using
/// the given database pool and doubles.
///
/// Mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack that production uses.
pub fn build_test_app(
    pool: PgPool,
    generator: Arc<dyn SpotImageGenerator>,
    dispatcher: Arc<dyn JobDispatcher>,
) -> Router {
    let state = AppState {
        pool,
        config: Arc::new(test_config()),
        dispatcher,
        generator,
        worker_id: "push-test".into(),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::health::router())
        .nest("/internal", routes::internal_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Build a task-delivery request. `queue: None` omits the queue headers
/// entirely (an unauthenticated caller).
pub fn task_request(plan_id: &str, spot_name: &str, queue: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/internal/tasks/spot-image")
        .header(CONTENT_TYPE, "application/json");
    if let Some(queue) = queue {
        builder = builder
            .header("x-queue-name", queue)
            .header("x-queue-task", "task-0001");
    }
    builder
        .body(Body::from(
            serde_json::json!({ "plan_id": plan_id, "spot_name": spot_name }).to_string(),
        ))
        .unwrap()
}

/// Issue a GET request against the app.
pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
