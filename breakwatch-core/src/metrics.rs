//! Prometheus metrics for discovery and ingestion
//!
//! Everything registers into [`REGISTRY`], which the HTTP layer exposes at
//! `/metrics`.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Encoder, IntCounterVec,
    IntGauge, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Discovery polling
pub mod discovery {
    use super::{register_int_counter_vec_with_registry, IntCounterVec, REGISTRY};

    /// Poll outcomes, labelled `ok` or `error`
    pub static POLLS_TOTAL: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "discovery_polls_total",
            "Total number of discovery polls by outcome",
            &["outcome"],
            REGISTRY.clone()
        )
        .expect("Failed to register POLLS_TOTAL")
    });

    /// Membership events, labelled `up` or `down`
    pub static EVENTS_TOTAL: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "discovery_events_total",
            "Total number of cluster membership events",
            &["kind"],
            REGISTRY.clone()
        )
        .expect("Failed to register EVENTS_TOTAL")
    });
}

/// Per-cluster ingestion
pub mod monitor {
    use super::{register_int_counter_vec_with_registry, register_int_gauge_with_registry, IntCounterVec, IntGauge, REGISTRY};

    /// Connection attempts per cluster
    pub static CONNECT_ATTEMPTS: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "monitor_connect_attempts_total",
            "Total number of telemetry connection attempts",
            &["cluster"],
            REGISTRY.clone()
        )
        .expect("Failed to register CONNECT_ATTEMPTS")
    });

    /// Connections that ended in error or were closed by the server
    pub static STREAM_FAILURES: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "monitor_stream_failures_total",
            "Total number of telemetry streams that ended",
            &["cluster", "reason"],
            REGISTRY.clone()
        )
        .expect("Failed to register STREAM_FAILURES")
    });

    /// Records received from the telemetry stream
    pub static RECORDS_TOTAL: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "monitor_records_total",
            "Total number of raw telemetry records received",
            &["cluster"],
            REGISTRY.clone()
        )
        .expect("Failed to register RECORDS_TOTAL")
    });

    /// Command records that failed to parse
    pub static PARSE_FAILURES: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "monitor_parse_failures_total",
            "Total number of command records dropped by the parser",
            &["cluster"],
            REGISTRY.clone()
        )
        .expect("Failed to register PARSE_FAILURES")
    });

    /// Cluster snapshots produced by sampling
    pub static SNAPSHOTS_TOTAL: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "monitor_snapshots_total",
            "Total number of cluster snapshots emitted",
            &["cluster"],
            REGISTRY.clone()
        )
        .expect("Failed to register SNAPSHOTS_TOTAL")
    });

    /// Monitors currently contributing to the merged stream
    pub static ACTIVE_CLUSTERS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "registry_active_clusters",
            "Clusters currently contributing to the merged stream",
            REGISTRY.clone()
        )
        .expect("Failed to register ACTIVE_CLUSTERS")
    });
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}
