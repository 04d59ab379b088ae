//! Cluster membership from configuration

use async_trait::async_trait;
use breakwatch_core::Cluster;
use tracing::{debug, warn};

use super::{coalesce, ClusterSource};
use crate::error::Result;

/// Fixed membership built from `name|url` entries.
///
/// Runtime changes to the configuration are not picked up.
#[derive(Debug, Clone)]
pub struct StaticClusterSource {
    clusters: Vec<Cluster>,
}

impl StaticClusterSource {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let clusters = coalesce(entries.iter().filter_map(|entry| parse_entry(entry.as_ref())));
        if clusters.is_empty() {
            warn!("No static clusters configured, is 'discovery.servers' set?");
        } else {
            debug!(count = clusters.len(), "Static cluster source configured");
        }
        Self { clusters }
    }

    #[must_use]
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }
}

/// Parse one `name|url` entry. Blank pieces are ignored.
fn parse_entry(entry: &str) -> Option<Cluster> {
    let parts: Vec<&str> = entry
        .split('|')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    match parts.as_slice() {
        [name, url] => Some(Cluster::new(*name, *url)),
        _ => {
            warn!(entry, "Invalid cluster entry, should be in the form <cluster name>|<cluster url>");
            None
        }
    }
}

#[async_trait]
impl ClusterSource for StaticClusterSource {
    async fn poll(&self) -> Result<Vec<Cluster>> {
        Ok(self.clusters.clone())
    }
}
