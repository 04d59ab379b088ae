//! Cluster discovery: pluggable membership sources and the polling catalog

pub mod catalog;
pub mod cluster_list;
pub mod composite;
pub mod static_source;

use async_trait::async_trait;
use breakwatch_core::Cluster;
use std::collections::HashSet;

use crate::error::Result;

pub use catalog::{diff_membership, CatalogSubscription, ClusterCatalog};
pub use cluster_list::ClusterListSource;
pub use composite::CompositeClusterSource;
pub use static_source::StaticClusterSource;

/// A source of cluster membership.
///
/// `poll` returns the full current membership. Duplicates are allowed in
/// principle but implementations coalesce them by value.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn poll(&self) -> Result<Vec<Cluster>>;
}

/// Drop repeated clusters while keeping first-seen order
pub(crate) fn coalesce(clusters: impl IntoIterator<Item = Cluster>) -> Vec<Cluster> {
    let mut seen = HashSet::new();
    clusters
        .into_iter()
        .filter(|cluster| seen.insert(cluster.clone()))
        .collect()
}
