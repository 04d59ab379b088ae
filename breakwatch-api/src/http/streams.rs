//! Server-sent event streams for dashboards
//!
//! - `/cluster.stream`: merged snapshots of every active cluster
//! - `/turbine-stream/{cluster}`: raw records of one cluster
//! - `/cluster-stream/{cluster}`: snapshots of one cluster

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    routing::get,
    Router,
};
use breakwatch_cluster::ClusterMonitor;
use breakwatch_core::ClusterMetrics;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{AppError, AppResult, AppState};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

pub fn create_stream_router() -> Router<AppState> {
    Router::new()
        .route("/cluster.stream", get(cluster_stream))
        .route("/turbine-stream/{cluster}", get(turbine_stream))
        .route("/cluster-stream/{cluster}", get(single_cluster_stream))
}

/// Resolves once the process starts shutting down
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender also means the server is going away
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

/// Wrap events as an SSE response that ends on shutdown
fn sse_response<S>(events: S, shutdown: watch::Receiver<bool>) -> Sse<KeepAliveStream<EventStream>>
where
    S: Stream<Item = Event> + Send + 'static,
{
    let stream = events
        .take_until(shutdown_requested(shutdown))
        .map(Ok::<_, Infallible>)
        .boxed();
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

fn metrics_events(metrics: BoxStream<'static, ClusterMetrics>) -> impl Stream<Item = Event> + Send + 'static {
    metrics.filter_map(|snapshot| async move {
        match Event::default().json_data(&snapshot) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(cluster = %snapshot.cluster_name, error = %e, "Failed to encode cluster metrics");
                None
            }
        }
    })
}

fn find_monitor(state: &AppState, cluster: &str) -> AppResult<Arc<dyn ClusterMonitor>> {
    state
        .registry
        .lookup(cluster)
        .ok_or_else(|| AppError::not_found(format!("Cluster '{cluster}' not found")))
}

async fn cluster_stream(State(state): State<AppState>) -> Sse<KeepAliveStream<EventStream>> {
    info!("Client subscribed to merged cluster stream");
    sse_response(metrics_events(state.registry.observe_all()), state.shutdown.clone())
}

async fn turbine_stream(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
) -> AppResult<Sse<KeepAliveStream<EventStream>>> {
    let monitor = find_monitor(&state, &cluster)?;
    info!(cluster = %cluster, "Client subscribed to raw cluster stream");

    let events = monitor
        .raw_events()
        .map(|record| Event::default().data(&*record));
    Ok(sse_response(events, state.shutdown.clone()))
}

async fn single_cluster_stream(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
) -> AppResult<Sse<KeepAliveStream<EventStream>>> {
    let monitor = find_monitor(&state, &cluster)?;
    info!(cluster = %cluster, "Client subscribed to cluster metrics stream");

    Ok(sse_response(metrics_events(monitor.metrics()), state.shutdown.clone()))
}
