//! Liveness and readiness endpoints

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::http::AppState;

pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
}

/// Always `OK` while the process serves requests
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub clusters: usize,
    pub active_clusters: usize,
}

/// Known and currently forwarded clusters. 503 once shutdown has begun,
/// so load balancers stop routing new dashboard streams here.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let names = state.registry.cluster_names();
    let active_clusters = names.iter().filter(|name| state.registry.is_active(name)).count();

    let (code, status) = if *state.shutdown.borrow() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "ready")
    };

    (
        code,
        Json(Readiness {
            status,
            clusters: names.len(),
            active_clusters,
        }),
    )
}
