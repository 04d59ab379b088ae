mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use breakwatch_cluster::{
    ClusterCatalog, ClusterListSource, ClusterRegistry, ClusterSource, CompositeClusterSource,
    HttpClusterMonitorFactory, MonitorSettings, StaticClusterSource,
};
use breakwatch_core::{
    bootstrap::load_config,
    config::{DiscoveryConfig, DiscoveryMode},
    logging,
};

use server::BreakwatchServer;

#[derive(Parser, Debug)]
#[command(name = "breakwatch")]
#[command(about = "Cluster reliability dashboard backend", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(long, env = "BREAKWATCH_CONFIG_PATH")]
    config: Option<String>,
}

/// Build the discovery source selected by `discovery.mode`
fn build_source(config: &DiscoveryConfig) -> Result<Arc<dyn ClusterSource>> {
    let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);

    let source: Arc<dyn ClusterSource> = match config.mode {
        DiscoveryMode::Static => Arc::new(StaticClusterSource::new(config.servers.as_slice())),
        DiscoveryMode::ClusterList => {
            Arc::new(ClusterListSource::new(config.cluster_list_urls.clone(), fetch_timeout)?)
        }
        DiscoveryMode::Composite => {
            let static_source: Arc<dyn ClusterSource> = Arc::new(StaticClusterSource::new(config.servers.as_slice()));
            let list_source: Arc<dyn ClusterSource> =
                Arc::new(ClusterListSource::new(config.cluster_list_urls.clone(), fetch_timeout)?);
            Arc::new(CompositeClusterSource::new(vec![static_source, list_source]))
        }
    };

    Ok(source)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("breakwatch starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Discovery
    let source = build_source(&config.discovery)?;
    info!(
        mode = ?config.discovery.mode,
        poll_interval_secs = config.discovery.poll_interval_secs,
        "Cluster discovery configured"
    );
    if config.discovery.servers.is_empty() && config.discovery.cluster_list_urls.is_empty() {
        warn!("No clusters or cluster list URLs configured, the dashboard will stay empty");
    }
    let catalog = ClusterCatalog::new(source, Duration::from_secs(config.discovery.poll_interval_secs));

    // 4. Monitors and registry
    let factory = HttpClusterMonitorFactory::new(MonitorSettings::from(&config.monitor))?;
    let registry = ClusterRegistry::new(catalog, Arc::new(factory));

    // 5. Serve until shutdown
    BreakwatchServer::new(config, registry).start().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakwatch_core::Cluster;

    #[tokio::test]
    async fn test_build_source_per_mode() {
        let mut config = DiscoveryConfig {
            servers: vec!["orders|http://turbine/orders".to_string()],
            ..DiscoveryConfig::default()
        };

        let source = build_source(&config).unwrap();
        assert_eq!(source.poll().await.unwrap(), vec![Cluster::new("orders", "http://turbine/orders")]);

        // The catalog list is empty, so only the static entries remain
        config.mode = DiscoveryMode::Composite;
        let source = build_source(&config).unwrap();
        assert_eq!(source.poll().await.unwrap(), vec![Cluster::new("orders", "http://turbine/orders")]);

        config.mode = DiscoveryMode::ClusterList;
        let source = build_source(&config).unwrap();
        assert!(source.poll().await.unwrap().is_empty());
    }
}
