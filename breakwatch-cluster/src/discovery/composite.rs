use async_trait::async_trait;
use breakwatch_core::Cluster;
use std::sync::Arc;
use tracing::warn;

use super::{coalesce, ClusterSource};
use crate::error::{Error, Result};

/// Union of several sources, coalesced by value
pub struct CompositeClusterSource {
    sources: Vec<Arc<dyn ClusterSource>>,
}

impl CompositeClusterSource {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn ClusterSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl ClusterSource for CompositeClusterSource {
    async fn poll(&self) -> Result<Vec<Cluster>> {
        if self.sources.is_empty() {
            warn!("No discovery sources configured");
            return Ok(Vec::new());
        }

        let results = futures::future::join_all(self.sources.iter().map(|source| source.poll())).await;

        let mut clusters = Vec::new();
        let mut failures = 0;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(found) => clusters.extend(found),
                Err(e) => {
                    failures += 1;
                    warn!(source = index, error = %e, "Discovery source failed");
                }
            }
        }

        if failures == self.sources.len() {
            return Err(Error::Discovery("every discovery source failed".to_string()));
        }

        Ok(coalesce(clusters))
    }
}
