//! Per-cluster telemetry ingestion and sampling

pub mod cache;
pub mod http;
pub mod sse;

use breakwatch_core::config::MonitorConfig;
use breakwatch_core::ClusterMetrics;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use cache::CommandCache;
pub use http::{HttpClusterMonitor, HttpClusterMonitorFactory};
pub use sse::SseDecoder;

/// Cluster snapshots, one per sampling tick
pub type MetricsStream = BoxStream<'static, ClusterMetrics>;

/// Raw telemetry records exactly as received
pub type RawEventStream = BoxStream<'static, Arc<str>>;

/// Connection lifecycle of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// Live view of one cluster.
///
/// Both streams are shared: every call joins the same underlying
/// connection from the current point on, and neither ends on its own.
pub trait ClusterMonitor: Send + Sync {
    fn cluster_name(&self) -> &str;

    fn stream_url(&self) -> &str;

    /// Cluster snapshots sampled from the command cache
    fn metrics(&self) -> MetricsStream;

    /// Telemetry records passed through untouched
    fn raw_events(&self) -> RawEventStream;

    fn state(&self) -> MonitorState;

    /// Forget previous connection failures so the next retry starts from
    /// the shortest delay
    fn reset(&self);

    /// Stop ingestion and sampling for good
    fn shutdown(&self);
}

/// Builds the monitor for a newly discovered cluster
pub trait ClusterMonitorFactory: Send + Sync {
    fn create(&self, name: &str, url: &str) -> Arc<dyn ClusterMonitor>;
}

/// Timing knobs for a monitor
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub stall_timeout: Duration,
    pub backoff_step: Duration,
    pub max_backoff_steps: u32,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub sample_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            stall_timeout: Duration::from_secs(config.stall_timeout_secs),
            backoff_step: Duration::from_secs(config.backoff_step_secs),
            max_backoff_steps: config.max_backoff_steps,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cache_capacity: 10_000,
            sample_interval: Duration::from_millis(config.sample_interval_ms),
        }
    }
}

impl MonitorSettings {
    /// Delay before reconnect attempt number `attempt` (1-based)
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt.min(self.max_backoff_steps)
    }
}
