//! Value types shared across discovery, monitoring and the push channel

pub mod cluster;
pub mod cluster_metrics;
pub mod command;

pub use cluster::Cluster;
pub use cluster_metrics::{ClusterMetrics, ClusterMetricsBuilder, MetricsType};
pub use command::{is_command_record, CommandMetrics, CommandRecord};
