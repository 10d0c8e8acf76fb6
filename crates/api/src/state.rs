use std::sync::Arc;

use waypoint_pipeline::dispatch::JobDispatcher;
use waypoint_pipeline::generator::SpotImageGenerator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc` or is already
/// `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: waypoint_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Dispatch strategy selected at startup (push queue or no-op).
    pub dispatcher: Arc<dyn JobDispatcher>,
    /// Execution boundary for spot-image generation.
    pub generator: Arc<dyn SpotImageGenerator>,
    /// Lease label for push deliveries handled by this process.
    pub worker_id: Arc<str>,
}
