//! Known cluster listing

use axum::{extract::State, routing::get, Json, Router};

use super::AppState;

pub fn create_clusters_router() -> Router<AppState> {
    Router::new().route("/clusters", get(list_clusters))
}

/// Every cluster discovered since startup, active or not
async fn list_clusters(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.cluster_names())
}
