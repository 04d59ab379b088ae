//! Cluster-wide rollup of command metrics

use serde::{Deserialize, Serialize};

use super::command::CommandMetrics;

/// Prefix of the per-cluster dashboard link. The cluster name is appended.
pub const DASHBOARD_URL_PREFIX: &str = "hystrix/monitor.html?stream=../turbine-stream/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricsType {
    Cluster,
}

/// Snapshot of one cluster, produced once per sampling tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetrics {
    pub cluster_name: String,
    pub stream_url: String,
    pub dashboard_url: String,
    pub request_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub timeout_count: u64,
    pub short_circuited_count: u64,
    pub rejected_count: u64,
    pub reporting_hosts: u32,
    pub command_count: u32,
    pub request_rate: f64,
    pub error_percentage: f64,
    #[serde(rename = "type")]
    pub metrics_type: MetricsType,
}

impl ClusterMetrics {
    /// Empty snapshot for a cluster
    #[must_use]
    pub fn empty(cluster_name: impl Into<String>, stream_url: impl Into<String>) -> Self {
        let cluster_name = cluster_name.into();
        Self {
            dashboard_url: dashboard_url(&cluster_name),
            cluster_name,
            stream_url: stream_url.into(),
            request_count: 0,
            success_count: 0,
            fail_count: 0,
            timeout_count: 0,
            short_circuited_count: 0,
            rejected_count: 0,
            reporting_hosts: 0,
            command_count: 0,
            request_rate: 0.0,
            error_percentage: 0.0,
            metrics_type: MetricsType::Cluster,
        }
    }

    #[must_use]
    pub fn builder(cluster_name: impl Into<String>, stream_url: impl Into<String>) -> ClusterMetricsBuilder {
        ClusterMetricsBuilder::new(cluster_name, stream_url)
    }
}

/// Dashboard link for a cluster
#[must_use]
pub fn dashboard_url(cluster_name: &str) -> String {
    format!("{DASHBOARD_URL_PREFIX}{cluster_name}")
}

/// Folds command metrics into a [`ClusterMetrics`] one at a time.
///
/// The error percentage is an unweighted running mean over commands: after
/// the k-th fold it holds `(avg * (k - 1) + next) / k`. A busy command and
/// an idle one weigh the same.
#[derive(Debug, Clone)]
pub struct ClusterMetricsBuilder {
    metrics: ClusterMetrics,
}

impl ClusterMetricsBuilder {
    #[must_use]
    pub fn new(cluster_name: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            metrics: ClusterMetrics::empty(cluster_name, stream_url),
        }
    }

    /// Fold one command into the running totals
    pub fn add_command(&mut self, command: &CommandMetrics) -> &mut Self {
        let m = &mut self.metrics;
        m.fail_count = m.fail_count.saturating_add(command.failed);
        m.success_count = m.success_count.saturating_add(command.success);
        m.rejected_count = m.rejected_count.saturating_add(command.rejected);
        m.request_count = m.request_count.saturating_add(command.requests);
        m.timeout_count = m.timeout_count.saturating_add(command.timed_out);
        m.request_rate += command.request_rate;
        m.short_circuited_count = m.short_circuited_count.saturating_add(command.short_circuited);
        m.reporting_hosts = m.reporting_hosts.max(command.reporting_hosts);

        let folded = f64::from(m.command_count);
        m.error_percentage = (m.error_percentage * folded + command.error_percentage) / (folded + 1.0);
        m.command_count = m.command_count.saturating_add(1);

        self
    }

    /// Fold every command from an iterator
    pub fn add_commands<'a, I>(&mut self, commands: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a CommandMetrics>,
    {
        for command in commands {
            self.add_command(command);
        }
        self
    }

    /// Current running state, without consuming the builder
    #[must_use]
    pub fn current(&self) -> &ClusterMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn build(&self) -> ClusterMetrics {
        self.metrics.clone()
    }
}
