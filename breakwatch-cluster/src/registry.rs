//! Cluster registry: one monitor per discovered cluster, merged output
//!
//! A supervisor task consumes catalog events. Every up-event makes sure a
//! monitor exists and that its snapshots are forwarded into the merged
//! stream. A down-event cancels that forwarder. Monitors themselves are
//! kept for the life of the registry and can still be looked up by name.

use breakwatch_core::metrics::monitor::ACTIVE_CLUSTERS;
use breakwatch_core::{Cluster, ClusterMetrics};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::ClusterCatalog;
use crate::monitor::{ClusterMonitor, ClusterMonitorFactory, MetricsStream};

const MERGED_CHANNEL_CAPACITY: usize = 1024;

/// Delay before resubscribing to the catalog if its sequence ever ends
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Live contribution of one cluster to the merged stream
struct Gate {
    id: u64,
    token: CancellationToken,
}

struct RegistryInner {
    catalog: ClusterCatalog,
    factory: Arc<dyn ClusterMonitorFactory>,
    monitors: DashMap<String, Arc<dyn ClusterMonitor>>,
    gates: DashMap<String, Gate>,
    next_gate_id: AtomicU64,
    merged: broadcast::Sender<ClusterMetrics>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl RegistryInner {
    async fn supervise(self: Arc<Self>) {
        info!("Cluster registry started");

        loop {
            let mut subscription = self.catalog.subscribe();
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        info!("Cluster registry stopped");
                        return;
                    }
                    event = subscription.recv() => match event {
                        Some(cluster) => self.handle_event(cluster),
                        None => break,
                    },
                }
            }

            warn!("Catalog subscription closed, resubscribing");
            drop(subscription);
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    fn handle_event(self: &Arc<Self>, cluster: Cluster) {
        if cluster.active {
            self.cluster_up(&cluster);
        } else {
            self.cluster_down(&cluster.name);
        }
    }

    fn cluster_up(self: &Arc<Self>, cluster: &Cluster) {
        let monitor = Arc::clone(
            self.monitors
                .entry(cluster.name.clone())
                .or_insert_with(|| {
                    info!(cluster = %cluster.name, url = %cluster.url, "Creating monitor for new cluster");
                    self.factory.create(&cluster.name, &cluster.url)
                })
                .value(),
        );

        if monitor.stream_url() != cluster.url {
            debug!(
                cluster = %cluster.name,
                url = %cluster.url,
                monitor_url = %monitor.stream_url(),
                "Cluster came back with a new url, keeping existing monitor"
            );
        }

        if self.gates.contains_key(&cluster.name) {
            debug!(cluster = %cluster.name, "Cluster already contributing");
            return;
        }

        self.spawn_forwarder(cluster.name.clone(), monitor);
    }

    fn cluster_down(&self, name: &str) {
        match self.gates.remove(name) {
            Some((_, gate)) => {
                gate.token.cancel();
                info!(cluster = name, "Cluster down, removed from merged stream");
            }
            None => debug!(cluster = name, "Down event for cluster without a contribution"),
        }
    }

    fn spawn_forwarder(self: &Arc<Self>, name: String, monitor: Arc<dyn ClusterMonitor>) {
        let id = self.next_gate_id.fetch_add(1, Ordering::Relaxed);
        let token = self.cancel.child_token();
        self.gates.insert(name.clone(), Gate { id, token: token.clone() });
        ACTIVE_CLUSTERS.inc();
        info!(cluster = %name, "Cluster up, forwarding metrics");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut metrics = monitor.metrics();
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    next = metrics.next() => match next {
                        Some(snapshot) => {
                            let _ = inner.merged.send(snapshot);
                        }
                        None => {
                            warn!(cluster = %name, "Cluster metrics ended unexpectedly");
                            break;
                        }
                    },
                }
            }

            // Only clear our own gate, a newer one may have replaced it
            inner.gates.remove_if(&name, |_, gate| gate.id == id);
            ACTIVE_CLUSTERS.dec();
            debug!(cluster = %name, "Metrics forwarder stopped");
        });
    }
}

/// Owns every cluster monitor and merges their snapshots
#[derive(Clone)]
pub struct ClusterRegistry {
    inner: Arc<RegistryInner>,
}

impl ClusterRegistry {
    #[must_use]
    pub fn new(catalog: ClusterCatalog, factory: Arc<dyn ClusterMonitorFactory>) -> Self {
        let (merged, _) = broadcast::channel(MERGED_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                catalog,
                factory,
                monitors: DashMap::new(),
                gates: DashMap::new(),
                next_gate_id: AtomicU64::new(0),
                merged,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Start consuming catalog events.
    ///
    /// Only the first call spawns the supervisor. Later calls return a
    /// handle to a task that finishes immediately.
    pub fn start(&self) -> JoinHandle<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("Cluster registry already started");
            return tokio::spawn(async {});
        }
        tokio::spawn(Arc::clone(&self.inner).supervise())
    }

    /// The merged snapshot stream of every active cluster.
    ///
    /// All callers share the same upstream and see snapshots from the
    /// moment they subscribe. The stream ends only after [`Self::shutdown`].
    #[must_use]
    pub fn observe_all(&self) -> MetricsStream {
        let cancel = self.inner.cancel.clone();
        BroadcastStream::new(self.inner.merged.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(snapshot) => Some(snapshot),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Merged metrics subscriber lagged");
                        None
                    }
                }
            })
            .take_until(cancel.cancelled_owned())
            .boxed()
    }

    /// Monitor for a cluster that has been discovered at some point
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ClusterMonitor>> {
        self.inner.monitors.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of every retained monitor, sorted
    #[must_use]
    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.monitors.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Whether the cluster currently contributes to the merged stream
    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.inner.gates.contains_key(name)
    }

    /// Stop the supervisor, every forwarder and every monitor
    pub fn shutdown(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        info!(monitors = self.inner.monitors.len(), "Shutting down cluster registry");
        self.inner.cancel.cancel();
        self.inner.gates.clear();
        for entry in &self.inner.monitors {
            entry.value().shutdown();
        }
    }
}
