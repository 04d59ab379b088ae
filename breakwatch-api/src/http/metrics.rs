//! Prometheus exposition endpoint

use axum::{http::header, response::IntoResponse, routing::get, Router};

use super::{AppResult, AppState};

pub fn create_metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics() -> AppResult<impl IntoResponse> {
    let body = breakwatch_core::metrics::gather_metrics()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
