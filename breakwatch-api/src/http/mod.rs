// Module: http
// Dashboard-facing HTTP surface: SSE telemetry streams plus health checks

pub mod clusters;
pub mod error;
pub mod health;
pub mod metrics;
pub mod streams;

use axum::Router;
use breakwatch_cluster::ClusterRegistry;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: ClusterRegistry,
    /// Flips to `true` once the process starts shutting down
    pub shutdown: watch::Receiver<bool>,
}

/// Create the HTTP router with all routes
pub fn create_router(registry: ClusterRegistry, shutdown: watch::Receiver<bool>) -> Router {
    let state = AppState { registry, shutdown };

    let router = Router::new()
        // Liveness and readiness checks
        .merge(health::create_health_router())
        .merge(metrics::create_metrics_router())
        .merge(clusters::create_clusters_router())
        .merge(streams::create_stream_router());

    // Dashboards are usually served from another origin
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    router.with_state(state)
}
