pub mod bootstrap;
pub mod models;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{Cluster, ClusterMetrics, ClusterMetricsBuilder, CommandMetrics};
