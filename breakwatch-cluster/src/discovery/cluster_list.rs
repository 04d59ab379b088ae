//! Cluster membership fetched from remote cluster-list catalogs
//!
//! Each catalog URL serves a JSON array of
//! `{"name": ..., "turbineStream": ..., "dashboardUrl": ...}`.

use async_trait::async_trait;
use breakwatch_core::Cluster;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{coalesce, ClusterSource};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    turbine_stream: Option<String>,
}

/// Polls one or more catalog endpoints and unions their clusters
pub struct ClusterListSource {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl ClusterListSource {
    /// Create a source with its own HTTP client
    pub fn new(urls: Vec<String>, fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(fetch_timeout)
            .timeout(fetch_timeout)
            .build()?;
        Ok(Self::with_client(client, urls))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, urls: Vec<String>) -> Self {
        debug!(?urls, "Cluster list source configured");
        Self { client, urls }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<Cluster>> {
        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(Error::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?;
        let infos: Vec<ClusterInfo> = serde_json::from_slice(&body)?;

        Ok(infos
            .into_iter()
            .filter_map(|info| match (info.name, info.turbine_stream) {
                (Some(name), Some(stream)) if !name.is_empty() && !stream.is_empty() => {
                    Some(Cluster::new(name, stream))
                }
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl ClusterSource for ClusterListSource {
    /// Fetch every catalog concurrently.
    ///
    /// A failing catalog is logged and skipped. The poll only fails when
    /// every catalog failed, so one outage cannot mark the fleet down.
    async fn poll(&self) -> Result<Vec<Cluster>> {
        if self.urls.is_empty() {
            warn!("No cluster list URLs configured, is 'discovery.cluster_list_urls' set?");
            return Ok(Vec::new());
        }

        let results = futures::future::join_all(self.urls.iter().map(|url| self.fetch(url))).await;

        let mut clusters = Vec::new();
        let mut failures = 0;
        for (url, result) in self.urls.iter().zip(results) {
            match result {
                Ok(found) => clusters.extend(found),
                Err(e) => {
                    failures += 1;
                    warn!(url = %url, error = %e, "Failed getting clusters from catalog");
                }
            }
        }

        if failures == self.urls.len() {
            return Err(Error::Discovery(format!("all {failures} cluster list catalogs failed")));
        }

        Ok(coalesce(clusters))
    }
}
