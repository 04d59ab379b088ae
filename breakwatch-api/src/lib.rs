// breakwatch API Library
//
// Serves cluster telemetry to dashboards over HTTP server-sent events

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState};
