//! Monitor backed by a remote aggregated telemetry stream
//!
//! One task holds the HTTP connection and republishes every record. It
//! reconnects forever with a linear, capped backoff. A second task folds
//! the command cache into a cluster snapshot on every sampling tick.
//! Both start on first use and stop on shutdown or drop.

use breakwatch_core::metrics::monitor::{
    CONNECT_ATTEMPTS, PARSE_FAILURES, RECORDS_TOTAL, SNAPSHOTS_TOTAL, STREAM_FAILURES,
};
use breakwatch_core::models::is_command_record;
use breakwatch_core::{ClusterMetrics, CommandMetrics};
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::ACCEPT;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::CommandCache;
use super::sse::SseDecoder;
use super::{
    ClusterMonitor, ClusterMonitorFactory, MetricsStream, MonitorSettings, MonitorState, RawEventStream,
};
use crate::error::{Error, Result};

const RAW_CHANNEL_CAPACITY: usize = 1024;
const METRICS_CHANNEL_CAPACITY: usize = 64;

struct MonitorInner {
    name: String,
    url: String,
    client: reqwest::Client,
    settings: MonitorSettings,
    cache: CommandCache,
    raw_tx: broadcast::Sender<Arc<str>>,
    metrics_tx: broadcast::Sender<ClusterMetrics>,
    state: RwLock<MonitorState>,
    attempts: AtomicU32,
    ingesting: AtomicBool,
    sampling: AtomicBool,
    reset: Notify,
    cancel: CancellationToken,
}

impl MonitorInner {
    fn set_state(&self, state: MonitorState) {
        *self.state.write() = state;
    }

    fn ensure_ingesting(self: &Arc<Self>) {
        if self.cancel.is_cancelled() || self.ingesting.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(Arc::clone(self).ingest_loop());
    }

    fn ensure_sampling(self: &Arc<Self>) {
        if self.cancel.is_cancelled() || self.sampling.swap(true, Ordering::SeqCst) {
            return;
        }
        // Subscribe before ingestion starts so no early record is missed
        let raw = self.raw_tx.subscribe();
        tokio::spawn(Arc::clone(self).sample_loop(raw));
        self.ensure_ingesting();
    }

    async fn ingest_loop(self: Arc<Self>) {
        info!(cluster = %self.name, url = %self.url, "Telemetry ingestion started");

        loop {
            self.set_state(MonitorState::Connecting);
            CONNECT_ATTEMPTS.with_label_values(&[self.name.as_str()]).inc();

            let outcome = tokio::select! {
                () = self.cancel.cancelled() => break,
                outcome = self.stream_once() => outcome,
            };

            let reason = match &outcome {
                Ok(()) => "closed",
                Err(Error::Timeout(_)) => "stalled",
                Err(Error::Status { .. }) => "status",
                Err(_) => "error",
            };
            STREAM_FAILURES.with_label_values(&[self.name.as_str(), reason]).inc();
            match outcome {
                Ok(()) => info!(cluster = %self.name, "Telemetry stream ended"),
                Err(e) => warn!(cluster = %self.name, url = %self.url, error = %e, "Telemetry stream failed"),
            }

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            let delay = self.settings.backoff_delay(attempt);
            self.set_state(MonitorState::Backoff);
            info!(cluster = %self.name, attempt, delay = ?delay, "Reconnecting to telemetry stream");

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
                () = self.reset.notified() => {
                    debug!(cluster = %self.name, "Backoff interrupted by reset");
                }
            }
        }

        self.set_state(MonitorState::Disconnected);
        info!(cluster = %self.name, "Telemetry ingestion stopped");
    }

    /// Hold one connection until it ends, stalls or fails
    async fn stream_once(&self) -> Result<()> {
        let stall = self.settings.stall_timeout;

        let request = self.client.get(&self.url).header(ACCEPT, "text/event-stream").send();
        let response = tokio::time::timeout(stall, request)
            .await
            .map_err(|_| Error::Timeout(format!("no response within {stall:?}")))??;

        if !response.status().is_success() {
            return Err(Error::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        self.set_state(MonitorState::Streaming);
        info!(cluster = %self.name, url = %self.url, "Connected to telemetry stream");

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = match tokio::time::timeout(stall, body.next()).await {
                Err(_) => return Err(Error::Timeout(format!("no data within {stall:?}"))),
                Ok(None) => return Ok(()),
                Ok(Some(chunk)) => chunk?,
            };

            for record in decoder.feed(&chunk) {
                RECORDS_TOTAL.with_label_values(&[self.name.as_str()]).inc();
                // Nobody listening is fine, records are not retained
                let _ = self.raw_tx.send(Arc::from(record));
            }
        }
    }

    async fn sample_loop(self: Arc<Self>, mut raw: broadcast::Receiver<Arc<str>>) {
        let mut ticker = tokio::time::interval(self.settings.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                received = raw.recv() => match received {
                    Ok(record) => self.ingest_record(&record),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(cluster = %self.name, skipped, "Sampler lagged behind telemetry stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick() => self.emit_snapshot(),
            }
        }

        debug!(cluster = %self.name, "Sampler stopped");
    }

    fn ingest_record(&self, record: &str) {
        if !is_command_record(record) {
            return;
        }
        match CommandMetrics::parse(record) {
            Ok(metrics) => self.cache.upsert(metrics),
            Err(e) => {
                PARSE_FAILURES.with_label_values(&[self.name.as_str()]).inc();
                warn!(cluster = %self.name, error = %e, "Failed to parse command record");
            }
        }
    }

    fn emit_snapshot(&self) {
        let commands = self.cache.snapshot();
        let snapshot = ClusterMetrics::builder(&self.name, &self.url)
            .add_commands(&commands)
            .build();
        SNAPSHOTS_TOTAL.with_label_values(&[self.name.as_str()]).inc();
        let _ = self.metrics_tx.send(snapshot);
    }
}

/// Monitor for one cluster's aggregated SSE telemetry endpoint
pub struct HttpClusterMonitor {
    inner: Arc<MonitorInner>,
}

impl HttpClusterMonitor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, settings: MonitorSettings) -> Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(settings.stall_timeout).build()?;
        Ok(Self::with_client(client, name, url, settings))
    }

    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        name: impl Into<String>,
        url: impl Into<String>,
        settings: MonitorSettings,
    ) -> Self {
        let (raw_tx, _) = broadcast::channel(RAW_CHANNEL_CAPACITY);
        let (metrics_tx, _) = broadcast::channel(METRICS_CHANNEL_CAPACITY);
        let cache = CommandCache::new(settings.cache_ttl, settings.cache_capacity);

        Self {
            inner: Arc::new(MonitorInner {
                name: name.into(),
                url: url.into(),
                client,
                settings,
                cache,
                raw_tx,
                metrics_tx,
                state: RwLock::new(MonitorState::Disconnected),
                attempts: AtomicU32::new(0),
                ingesting: AtomicBool::new(false),
                sampling: AtomicBool::new(false),
                reset: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Consecutive failed connections since creation or the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

fn skip_lagged<T: Clone + Send + 'static>(
    stream: BroadcastStream<T>,
) -> impl futures::Stream<Item = T> + Send + 'static {
    stream.filter_map(|item| async move {
        match item {
            Ok(value) => Some(value),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "Monitor subscriber lagged");
                None
            }
        }
    })
}

impl ClusterMonitor for HttpClusterMonitor {
    fn cluster_name(&self) -> &str {
        &self.inner.name
    }

    fn stream_url(&self) -> &str {
        &self.inner.url
    }

    fn metrics(&self) -> MetricsStream {
        let receiver = self.inner.metrics_tx.subscribe();
        self.inner.ensure_sampling();
        skip_lagged(BroadcastStream::new(receiver)).boxed()
    }

    fn raw_events(&self) -> RawEventStream {
        let receiver = self.inner.raw_tx.subscribe();
        self.inner.ensure_ingesting();
        skip_lagged(BroadcastStream::new(receiver)).boxed()
    }

    fn state(&self) -> MonitorState {
        *self.inner.state.read()
    }

    fn reset(&self) {
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.reset.notify_waiters();
        debug!(cluster = %self.inner.name, "Monitor reset");
    }

    fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!(cluster = %self.inner.name, "Shutting down monitor");
            self.inner.cancel.cancel();
        }
    }
}

impl Drop for HttpClusterMonitor {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Creates [`HttpClusterMonitor`]s sharing one HTTP client
#[derive(Clone)]
pub struct HttpClusterMonitorFactory {
    client: reqwest::Client,
    settings: MonitorSettings,
}

impl HttpClusterMonitorFactory {
    pub fn new(settings: MonitorSettings) -> Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(settings.stall_timeout).build()?;
        Ok(Self { client, settings })
    }
}

impl ClusterMonitorFactory for HttpClusterMonitorFactory {
    fn create(&self, name: &str, url: &str) -> Arc<dyn ClusterMonitor> {
        debug!(cluster = name, url, "Creating cluster monitor");
        Arc::new(HttpClusterMonitor::with_client(
            self.client.clone(),
            name,
            url,
            self.settings.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn command_record(name: &str, success: u64, failure: u64) -> String {
        serde_json::json!({
            "type": "HystrixCommand",
            "name": name,
            "reportingHosts": 1,
            "rollingCountTimeout": 0,
            "rollingCountFailure": failure,
            "rollingCountSuccess": success,
            "rollingCountShortCircuited": 0,
            "rollingCountThreadPoolRejected": 0,
            "rollingCountSemaphoreRejected": 0,
            "propertyValue_metricsRollingStatisticalWindowInMilliseconds": 10000,
            "latencyExecute": {"50": 3}
        })
        .to_string()
    }

    fn sse_body(records: &[String]) -> String {
        records.iter().map(|record| format!("data: {record}\n\n")).collect()
    }

    fn fast_settings() -> MonitorSettings {
        MonitorSettings {
            stall_timeout: Duration::from_secs(5),
            backoff_step: Duration::from_secs(30),
            max_backoff_steps: 6,
            cache_ttl: Duration::from_secs(30),
            cache_capacity: 100,
            sample_interval: Duration::from_millis(50),
        }
    }

    async fn mount_stream(server: &MockServer, body: String) {
        Mock::given(method("GET"))
            .and(path("/turbine.stream"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(server)
            .await;
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition within deadline");
    }

    #[tokio::test]
    async fn test_snapshots_fold_command_records() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            command_record("GetUser", 90, 10),
            r#"{"type":"HystrixThreadPool","name":"users"}"#.to_string(),
            command_record("ListOrders", 50, 0),
        ]);
        mount_stream(&server, body).await;

        let monitor = HttpClusterMonitor::new("orders", format!("{}/turbine.stream", server.uri()), fast_settings())
            .unwrap();
        let mut metrics = monitor.metrics();

        let snapshot = timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = metrics.next().await.expect("metrics stream never ends");
                if snapshot.command_count == 2 {
                    return snapshot;
                }
            }
        })
        .await
        .expect("snapshot with both commands");

        assert_eq!(snapshot.cluster_name, "orders");
        assert_eq!(snapshot.dashboard_url, "hystrix/monitor.html?stream=../turbine-stream/orders");
        assert_eq!(snapshot.request_count, 150);
        assert_eq!(snapshot.success_count, 140);
        assert_eq!(snapshot.fail_count, 10);
        assert_eq!(snapshot.reporting_hosts, 1);
        assert!((snapshot.error_percentage - 5.0).abs() < 1e-9);
        assert!((snapshot.request_rate - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_raw_events_pass_every_record_through() {
        let server = MockServer::start().await;
        let pool = r#"{"type":"HystrixThreadPool","name":"users"}"#.to_string();
        let command = command_record("GetUser", 1, 0);
        mount_stream(&server, sse_body(&[pool.clone(), command.clone()])).await;

        let monitor = HttpClusterMonitor::new("orders", format!("{}/turbine.stream", server.uri()), fast_settings())
            .unwrap();
        let events: Vec<Arc<str>> = timeout(Duration::from_secs(5), monitor.raw_events().take(2).collect())
            .await
            .expect("raw records");

        assert_eq!(events, vec![Arc::<str>::from(pool), Arc::<str>::from(command)]);
    }

    #[tokio::test]
    async fn test_failed_connection_backs_off_and_reset_reconnects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let monitor = HttpClusterMonitor::new("orders", format!("{}/turbine.stream", server.uri()), fast_settings())
            .unwrap();
        let _raw = monitor.raw_events();

        wait_for(|| monitor.attempts() == 1 && monitor.state() == MonitorState::Backoff).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        // The 30s backoff is cut short
        monitor.reset();
        wait_for(|| monitor.attempts() == 1 && monitor.state() == MonitorState::Backoff).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stalled_upstream_counts_as_failed_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&[command_record("GetUser", 1, 0)]), "text/event-stream")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let settings = MonitorSettings {
            stall_timeout: Duration::from_millis(200),
            ..fast_settings()
        };
        let monitor = HttpClusterMonitor::new("orders", format!("{}/turbine.stream", server.uri()), settings).unwrap();
        let _raw = monitor.raw_events();

        wait_for(|| monitor.attempts() == 1 && monitor.state() == MonitorState::Backoff).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_share_one_upstream_connection() {
        let server = MockServer::start().await;
        mount_stream(&server, sse_body(&[command_record("GetUser", 9, 1)])).await;

        let monitor = HttpClusterMonitor::new("orders", format!("{}/turbine.stream", server.uri()), fast_settings())
            .unwrap();
        let mut raw_a = monitor.raw_events();
        let mut raw_b = monitor.raw_events();
        let mut metrics_a = monitor.metrics();
        let mut metrics_b = monitor.metrics();

        timeout(Duration::from_secs(5), async {
            assert!(raw_a.next().await.is_some());
            assert!(raw_b.next().await.is_some());
            assert!(metrics_a.next().await.is_some());
            assert!(metrics_b.next().await.is_some());
        })
        .await
        .expect("every subscriber receives data");

        // The body ends after one record, then the 30s backoff holds
        wait_for(|| monitor.state() == MonitorState::Backoff).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_keep_flowing_while_disconnected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let monitor = HttpClusterMonitor::new("orders", format!("{}/turbine.stream", server.uri()), fast_settings())
            .unwrap();
        let snapshots: Vec<ClusterMetrics> = timeout(Duration::from_secs(5), monitor.metrics().take(3).collect())
            .await
            .expect("empty snapshots each tick");

        assert!(snapshots.iter().all(|s| s.command_count == 0 && s.request_count == 0));
    }

    #[tokio::test]
    async fn test_shutdown_stops_ingestion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let monitor = HttpClusterMonitor::new("orders", format!("{}/turbine.stream", server.uri()), fast_settings())
            .unwrap();
        let _raw = monitor.raw_events();
        wait_for(|| monitor.state() == MonitorState::Backoff).await;

        monitor.shutdown();
        wait_for(|| monitor.state() == MonitorState::Disconnected).await;

        // No restart after shutdown
        let _again = monitor.raw_events();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.state(), MonitorState::Disconnected);
    }

    #[test]
    fn test_factory_creates_named_monitors() {
        let factory = HttpClusterMonitorFactory::new(fast_settings()).unwrap();
        let monitor = factory.create("orders", "http://turbine/turbine.stream?cluster=orders");
        assert_eq!(monitor.cluster_name(), "orders");
        assert_eq!(monitor.stream_url(), "http://turbine/turbine.stream?cluster=orders");
        assert_eq!(monitor.state(), MonitorState::Disconnected);
    }
}
