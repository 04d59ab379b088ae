//! Polling catalog that turns membership snapshots into up/down events
//!
//! A single background task polls the source with a fixed delay between
//! polls and diffs each result against the tracked membership. Events are
//! multicast to every subscriber. The task only runs while at least one
//! subscription is alive, and tracked membership is forgotten when the
//! last one goes away.

use breakwatch_core::metrics::discovery::{EVENTS_TOTAL, POLLS_TOTAL};
use breakwatch_core::Cluster;
use futures::{FutureExt, Stream};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ClusterSource;

/// Events buffered per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Compute membership events for one poll and update `tracked` in place.
///
/// Explicit changes reported by the poll come first, in poll order. Then
/// every tracked cluster missing from the poll is reported down, by name.
pub fn diff_membership(tracked: &mut HashMap<String, Cluster>, polled: &[Cluster]) -> Vec<Cluster> {
    let mut events = Vec::new();

    for cluster in polled {
        let known = tracked.contains_key(&cluster.name);
        if known && !cluster.active {
            tracked.remove(&cluster.name);
            events.push(cluster.clone());
        } else if cluster.active && !known {
            tracked.insert(cluster.name.clone(), cluster.clone());
            events.push(cluster.clone());
        }
    }

    let polled_names: HashSet<&str> = polled.iter().map(|c| c.name.as_str()).collect();
    let mut missing: Vec<String> = tracked
        .keys()
        .filter(|name| !polled_names.contains(name.as_str()))
        .cloned()
        .collect();
    missing.sort();

    for name in missing {
        if let Some(cluster) = tracked.remove(&name) {
            events.push(cluster.as_down());
        }
    }

    events
}

#[derive(Default)]
struct Observers {
    count: usize,
    poller: Option<CancellationToken>,
}

struct CatalogInner {
    source: Arc<dyn ClusterSource>,
    poll_interval: Duration,
    tracked: Mutex<HashMap<String, Cluster>>,
    events: broadcast::Sender<Cluster>,
    observers: Mutex<Observers>,
}

impl CatalogInner {
    fn detach(&self) {
        let mut observers = self.observers.lock();
        observers.count = observers.count.saturating_sub(1);
        if observers.count == 0 {
            if let Some(poller) = observers.poller.take() {
                poller.cancel();
            }
            self.tracked.lock().clear();
            debug!("Last catalog subscriber detached, discovery state cleared");
        }
    }

    async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.poll_interval, "Cluster discovery started");

        loop {
            let polled = tokio::select! {
                () = cancel.cancelled() => break,
                result = AssertUnwindSafe(self.source.poll()).catch_unwind() => result,
            };

            match polled {
                Ok(Ok(clusters)) => {
                    POLLS_TOTAL.with_label_values(&["ok"]).inc();
                    // Held through the sends so a detach cannot clear state between diff and delivery
                    let mut tracked = self.tracked.lock();
                    if cancel.is_cancelled() {
                        break;
                    }
                    for cluster in diff_membership(&mut tracked, &clusters) {
                        let kind = if cluster.active { "up" } else { "down" };
                        EVENTS_TOTAL.with_label_values(&[kind]).inc();
                        info!(cluster = %cluster.name, url = %cluster.url, kind, "Cluster membership changed");
                        // No receivers only means every subscriber is mid-detach
                        let _ = self.events.send(cluster);
                    }
                    drop(tracked);
                }
                Ok(Err(e)) => {
                    POLLS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(error = %e, "Cluster discovery poll failed");
                }
                Err(_) => {
                    POLLS_TOTAL.with_label_values(&["error"]).inc();
                    warn!("Cluster discovery source panicked during poll");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Cluster discovery stopped");
    }
}

/// Shared, never-ending sequence of cluster membership events
#[derive(Clone)]
pub struct ClusterCatalog {
    inner: Arc<CatalogInner>,
}

impl ClusterCatalog {
    #[must_use]
    pub fn new(source: Arc<dyn ClusterSource>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CatalogInner {
                source,
                poll_interval,
                tracked: Mutex::new(HashMap::new()),
                events,
                observers: Mutex::new(Observers::default()),
            }),
        }
    }

    /// Attach to the event sequence, starting the poller if needed.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn subscribe(&self) -> CatalogSubscription {
        let mut observers = self.inner.observers.lock();
        let receiver = self.inner.events.subscribe();
        observers.count += 1;

        if observers.poller.is_none() {
            let cancel = CancellationToken::new();
            tokio::spawn(Arc::clone(&self.inner).poll_loop(cancel.clone()));
            observers.poller = Some(cancel);
        }

        CatalogSubscription {
            receiver,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.observers.lock().count
    }

    /// Clusters currently considered up
    #[must_use]
    pub fn tracked_clusters(&self) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = self.inner.tracked.lock().values().cloned().collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        clusters
    }
}

/// One observer of the catalog. Dropping it detaches.
pub struct CatalogSubscription {
    receiver: broadcast::Receiver<Cluster>,
    inner: Arc<CatalogInner>,
}

impl CatalogSubscription {
    /// Next membership event. Only returns `None` if the catalog is gone.
    pub async fn recv(&mut self) -> Option<Cluster> {
        loop {
            match self.receiver.recv().await {
                Ok(cluster) => return Some(cluster),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Catalog subscriber lagged, membership events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Consume the subscription as a stream
    pub fn into_stream(self) -> impl Stream<Item = Cluster> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|cluster| (cluster, subscription))
        })
    }
}

impl Drop for CatalogSubscription {
    fn drop(&mut self) {
        self.inner.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MockClusterSource;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    fn scripted_source<F>(script: F) -> (Arc<dyn ClusterSource>, Arc<AtomicUsize>)
    where
        F: Fn(usize) -> crate::Result<Vec<Cluster>> + Send + Sync + 'static,
    {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = MockClusterSource::new();
        source.expect_poll().returning(move || {
            let tick = counter.fetch_add(1, Ordering::SeqCst) + 1;
            script(tick)
        });
        (Arc::new(source), calls)
    }

    async fn collect(subscription: &mut CatalogSubscription, count: usize) -> Vec<Cluster> {
        let mut events = Vec::new();
        while events.len() < count {
            match subscription.recv().await {
                Some(cluster) => events.push(cluster),
                None => break,
            }
        }
        events
    }

    #[test]
    fn test_diff_emits_single_up_then_explicit_down() {
        let mut tracked = HashMap::new();
        let up = vec![Cluster::new("a", "ua")];

        assert_eq!(diff_membership(&mut tracked, &up), vec![Cluster::new("a", "ua")]);
        assert!(diff_membership(&mut tracked, &up).is_empty());
        assert!(diff_membership(&mut tracked, &up).is_empty());

        let down = vec![Cluster::inactive("a", "ua")];
        assert_eq!(diff_membership(&mut tracked, &down), vec![Cluster::inactive("a", "ua")]);
        assert!(tracked.is_empty());
        assert!(diff_membership(&mut tracked, &down).is_empty());
    }

    #[test]
    fn test_diff_synthesizes_down_for_missing_cluster() {
        let mut tracked = HashMap::new();
        let up = vec![Cluster::new("a", "ua")];
        for _ in 0..3 {
            diff_membership(&mut tracked, &up);
        }

        let events = diff_membership(&mut tracked, &[]);
        assert_eq!(events, vec![Cluster::inactive("a", "ua")]);
        assert!(tracked.is_empty());
    }

    #[test]
    fn test_diff_orders_explicit_events_before_synthesized() {
        let mut tracked = HashMap::new();
        diff_membership(
            &mut tracked,
            &[Cluster::new("a", "ua"), Cluster::new("b", "ub"), Cluster::new("c", "uc")],
        );

        let events = diff_membership(&mut tracked, &[Cluster::inactive("c", "uc"), Cluster::new("d", "ud")]);
        assert_eq!(
            events,
            vec![
                Cluster::inactive("c", "uc"),
                Cluster::new("d", "ud"),
                Cluster::inactive("a", "ua"),
                Cluster::inactive("b", "ub"),
            ]
        );
    }

    #[test]
    fn test_diff_ignores_inactive_unknown_cluster() {
        let mut tracked = HashMap::new();
        assert!(diff_membership(&mut tracked, &[Cluster::inactive("x", "ux")]).is_empty());
        assert!(tracked.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_emits_membership_changes() {
        let (source, _) = scripted_source(|tick| {
            Ok(if tick < 4 {
                vec![Cluster::new("one", "one"), Cluster::new("two", "two"), Cluster::new("three", "three")]
            } else if tick < 7 {
                vec![Cluster::new("one", "one"), Cluster::new("two", "two"), Cluster::inactive("three", "three")]
            } else {
                vec![Cluster::new("two", "two")]
            })
        });
        let catalog = ClusterCatalog::new(source, Duration::from_millis(50));
        let mut subscription = catalog.subscribe();

        let events = timeout(Duration::from_millis(500), collect(&mut subscription, 5))
            .await
            .expect("events within deadline");

        assert_eq!(
            events,
            vec![
                Cluster::new("one", "one"),
                Cluster::new("two", "two"),
                Cluster::new("three", "three"),
                Cluster::inactive("three", "three"),
                Cluster::inactive("one", "one"),
            ]
        );
        assert!(timeout(Duration::from_millis(300), subscription.recv()).await.is_err());
        assert_eq!(catalog.tracked_clusters(), vec![Cluster::new("two", "two")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failures_do_not_stop_discovery() {
        let (source, calls) = scripted_source(|tick| {
            if tick % 2 == 1 {
                Err(Error::Discovery("catalog unavailable".to_string()))
            } else {
                Ok(vec![Cluster::new("one", "one")])
            }
        });
        let catalog = ClusterCatalog::new(source, Duration::from_secs(10));
        let mut subscription = catalog.subscribe();

        let events = timeout(Duration::from_secs(60), collect(&mut subscription, 1))
            .await
            .expect("event after a failed poll");
        assert_eq!(events, vec![Cluster::new("one", "one")]);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(calls.load(Ordering::SeqCst) >= 5);
        assert_eq!(catalog.tracked_clusters(), vec![Cluster::new("one", "one")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_are_shared_between_subscribers() {
        let (source, calls) = scripted_source(|_| Ok(vec![Cluster::new("one", "one")]));
        let catalog = ClusterCatalog::new(source, Duration::from_secs(10));

        let mut first = catalog.subscribe();
        let mut second = catalog.subscribe();
        assert_eq!(catalog.subscriber_count(), 2);

        assert_eq!(first.recv().await, Some(Cluster::new("one", "one")));
        assert_eq!(second.recv().await, Some(Cluster::new("one", "one")));

        tokio::time::sleep(Duration::from_secs(35)).await;
        // One poll at start, then one every 10s
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_replays_active_membership() {
        let (source, _) = scripted_source(|_| Ok(vec![Cluster::new("one", "one"), Cluster::new("two", "two")]));
        let catalog = ClusterCatalog::new(source, Duration::from_millis(50));

        let mut subscription = catalog.subscribe();
        let first = collect(&mut subscription, 2).await;
        assert_eq!(first, vec![Cluster::new("one", "one"), Cluster::new("two", "two")]);
        assert_eq!(catalog.tracked_clusters().len(), 2);

        drop(subscription);
        assert_eq!(catalog.subscriber_count(), 0);
        assert!(catalog.tracked_clusters().is_empty());

        let mut subscription = catalog.subscribe();
        let second = timeout(Duration::from_millis(500), collect(&mut subscription, 2))
            .await
            .expect("fresh up-events after reattach");
        assert_eq!(second, first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rapid_reattach_never_duplicates_events() {
        let (source, _) = scripted_source(|_| Ok(vec![Cluster::new("one", "one"), Cluster::new("two", "two")]));
        let catalog = ClusterCatalog::new(source, Duration::from_millis(5));

        for _ in 0..30 {
            let mut subscription = catalog.subscribe();
            let events = timeout(Duration::from_secs(5), collect(&mut subscription, 2))
                .await
                .expect("up-events after attach");
            assert_eq!(events, vec![Cluster::new("one", "one"), Cluster::new("two", "two")]);
            assert!(timeout(Duration::from_millis(30), subscription.recv()).await.is_err());
        }
    }
}
