//! Batch runner: repeated probes against one target, plus bounded fan-out
//! across many node targets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::metrics::Metrics;
use crate::probe::{Probe, Target};
use crate::stats::{aggregate, SampleSet, Statistics};

/// Delay between consecutive HTTP probes of one batch.
pub const HTTP_PROBE_DELAY: Duration = Duration::from_millis(500);
/// Delay between consecutive TCP-based probes of one batch.
pub const TCP_PROBE_DELAY: Duration = Duration::from_millis(200);
/// Upper bound on concurrent batches during a node scan.
pub const MAX_SCAN_WORKERS: usize = 10;

/// Runs batches of probes and publishes their statistics.
pub struct BatchRunner {
    probe: Arc<dyn Probe>,
    metrics: Arc<Metrics>,
    http_delay: Duration,
    tcp_delay: Duration,
}

impl BatchRunner {
    pub fn new(probe: Arc<dyn Probe>, metrics: Arc<Metrics>) -> Self {
        Self {
            probe,
            metrics,
            http_delay: HTTP_PROBE_DELAY,
            tcp_delay: TCP_PROBE_DELAY,
        }
    }

    /// Override the inter-probe delays.
    #[cfg(test)]
    pub fn with_delays(mut self, http: Duration, tcp: Duration) -> Self {
        self.http_delay = http;
        self.tcp_delay = tcp;
        self
    }

    /// Run `count` sequential probes against `target`.
    ///
    /// Sleeps `delay` between attempts, never after the last one. Statistics are
    /// always published; `quiet` only silences logging.
    pub async fn run_batch(
        &self,
        target: &Target,
        count: u32,
        delay: Duration,
        quiet: bool,
    ) -> SampleSet {
        if !quiet {
            tracing::info!("Running {} test to {}", target.kind(), target);
        }

        let mut samples = SampleSet::new();

        for attempt in 1..=count {
            let result = self.probe.probe(target).await;
            if result.success {
                samples.push(result.elapsed);
                if !quiet {
                    let ms = result.elapsed.as_secs_f64() * 1000.0;
                    match (result.status_code, result.size_bytes) {
                        (Some(status), Some(size)) => tracing::info!(
                            "Request {}/{}: {:.2} ms, Status: {}, Size: {} bytes",
                            attempt, count, ms, status, size
                        ),
                        _ => tracing::info!("Ping {}/{}: {:.2} ms", attempt, count, ms),
                    }
                }
            } else if let Some(error) = &result.error {
                tracing::debug!("Attempt {}/{} to {} failed: {}", attempt, count, target, error);
            }

            if attempt < count {
                tokio::time::sleep(delay).await;
            }
        }

        match aggregate(&samples) {
            Some(stats) => {
                self.publish(target, &stats);
                if !quiet {
                    log_summary(target, &stats);
                }
            }
            None => {
                if !quiet {
                    tracing::warn!("No successful probes to {}", target);
                }
            }
        }

        samples
    }

    pub async fn run_http_test(&self, url: &str, count: u32, quiet: bool) -> SampleSet {
        self.run_batch(&Target::http(url), count, self.http_delay, quiet).await
    }

    pub async fn run_tcp_test(&self, host: &str, port: u16, count: u32, quiet: bool) -> SampleSet {
        self.run_batch(&Target::tcp(host, port), count, self.tcp_delay, quiet).await
    }

    /// Probe `service.namespace.svc.cluster.local:port`.
    pub async fn run_service_test(
        &self,
        service: &str,
        namespace: &str,
        port: u16,
        count: u32,
        quiet: bool,
    ) -> SampleSet {
        let target = Target::service(service, namespace, port);
        self.run_batch(&target, count, self.tcp_delay, quiet).await
    }

    /// Probe many nodes concurrently, at most `min(10, hosts)` at a time.
    ///
    /// A node whose batch task fails is logged and left out of the result.
    pub async fn scan_nodes(
        self: &Arc<Self>,
        hosts: &[String],
        port: u16,
        count: u32,
        quiet: bool,
    ) -> HashMap<String, SampleSet> {
        if hosts.is_empty() {
            return HashMap::new();
        }
        if !quiet {
            tracing::info!("Testing connectivity to {} Kubernetes nodes...", hosts.len());
        }

        let semaphore = Arc::new(Semaphore::new(hosts.len().min(MAX_SCAN_WORKERS)));

        let handles: Vec<_> = hosts
            .iter()
            .map(|host| {
                let runner = Arc::clone(self);
                let semaphore = semaphore.clone();
                let target = Target::node(host.as_str(), port);

                let handle = tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return SampleSet::new();
                    };
                    runner.run_batch(&target, count, runner.tcp_delay, quiet).await
                });
                (host.clone(), handle)
            })
            .collect();

        let mut results = HashMap::with_capacity(handles.len());
        for (host, handle) in handles {
            match handle.await {
                Ok(samples) => {
                    results.insert(host, samples);
                }
                Err(e) => tracing::error!("Scan of node {} failed: {}", host, e),
            }
        }

        results
    }

    fn publish(&self, target: &Target, stats: &Statistics) {
        match target {
            Target::Http { url } => self.metrics.publish_http_stats(url, stats),
            other => {
                if let Some((host, port)) = other.socket_addr() {
                    self.metrics.publish_tcp_stats(&host, port, stats);
                }
            }
        }
    }
}

fn log_summary(target: &Target, stats: &Statistics) {
    tracing::info!("Results for {}:", target);
    tracing::info!("  Min: {:.2} ms", stats.min);
    tracing::info!("  Max: {:.2} ms", stats.max);
    tracing::info!("  Avg: {:.2} ms", stats.mean);
    if let Some(stddev) = stats.stddev {
        tracing::info!("  Std Dev: {:.2} ms", stddev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, ProbeResult, Prober};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    /// Replays scripted latencies (in ms); `None` is a failed attempt.
    struct ScriptedProbe {
        outcomes: Mutex<VecDeque<Option<u64>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(outcomes: &[Option<u64>]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, _target: &Target) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcomes.lock().unwrap().pop_front().flatten() {
                Some(ms) => ProbeResult::connected(Duration::from_millis(ms)),
                None => ProbeResult::failed(
                    Duration::ZERO,
                    &ProbeError::Network("scripted failure".into()),
                ),
            }
        }
    }

    /// Succeeds for every node except `bad`, whose worker panics.
    struct FlakyNodeProbe {
        bad: &'static str,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Probe for FlakyNodeProbe {
        async fn probe(&self, target: &Target) -> ProbeResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if matches!(target, Target::K8sNode { host, .. } if host == self.bad) {
                panic!("node {} exploded", self.bad);
            }
            ProbeResult::connected(Duration::from_millis(1))
        }
    }

    /// Real prober whose listener goes away after `open_attempts` calls.
    struct ClosingListenerProbe {
        inner: Prober,
        listener: Mutex<Option<TcpListener>>,
        open_attempts: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Probe for ClosingListenerProbe {
        async fn probe(&self, target: &Target) -> ProbeResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let result = self.inner.probe(target).await;
            if call == self.open_attempts {
                drop(self.listener.lock().unwrap().take());
            }
            result
        }
    }

    fn runner(probe: Arc<dyn Probe>, metrics: Arc<Metrics>) -> BatchRunner {
        BatchRunner::new(probe, metrics).with_delays(Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_http_batch_statistics() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let probe = Arc::new(ScriptedProbe::new(&[Some(100), Some(200), Some(300)]));
        let runner = runner(probe.clone(), metrics.clone());

        let samples = runner.run_http_test("http://svc/", 3, true).await;
        assert_eq!(samples.as_millis(), &[100.0, 200.0, 300.0]);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);

        let labels = ["http://svc/"];
        assert_eq!(metrics.http_stats.min.with_label_values(&labels).get(), 100.0);
        assert_eq!(metrics.http_stats.max.with_label_values(&labels).get(), 300.0);
        assert!((metrics.http_stats.avg.with_label_values(&labels).get() - 200.0).abs() < 1e-9);
        assert!((metrics.http_stats.stddev.with_label_values(&labels).get() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tcp_batch_with_failures() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let probe = Arc::new(ScriptedProbe::new(&[None, Some(10), Some(30), None, None]));
        let runner = runner(probe, metrics.clone());

        let samples = runner.run_tcp_test("db", 5432, 5, false).await;
        assert_eq!(samples.len(), 2);

        let labels = ["db", "5432"];
        assert_eq!(metrics.tcp_stats.min.with_label_values(&labels).get(), 10.0);
        assert_eq!(metrics.tcp_stats.max.with_label_values(&labels).get(), 30.0);
        assert!((metrics.tcp_stats.avg.with_label_values(&labels).get() - 20.0).abs() < 1e-9);
        assert!(metrics.tcp_stats.stddev.with_label_values(&labels).get() > 0.0);
    }

    #[tokio::test]
    async fn test_empty_batch_keeps_previous_values() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let probe = Arc::new(ScriptedProbe::new(&[Some(5), Some(7), None, None]));
        let runner = runner(probe, metrics.clone());

        runner.run_service_test("api", "prod", 80, 2, true).await;
        let samples = runner.run_service_test("api", "prod", 80, 2, true).await;
        assert!(samples.is_empty());

        let labels = ["api.prod.svc.cluster.local", "80"];
        assert_eq!(metrics.tcp_stats.min.with_label_values(&labels).get(), 5.0);
        assert_eq!(metrics.tcp_stats.max.with_label_values(&labels).get(), 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_attempts_only() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let probe = Arc::new(ScriptedProbe::new(&[Some(1), Some(1), Some(1)]));
        let runner = BatchRunner::new(probe, metrics);

        let start = tokio::time::Instant::now();
        runner.run_tcp_test("db", 1, 3, true).await;
        assert_eq!(start.elapsed(), TCP_PROBE_DELAY * 2);
    }

    #[tokio::test]
    async fn test_tcp_batch_against_real_sockets() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let prober = Arc::new(Prober::new(Duration::from_secs(2), metrics.clone()).unwrap());
        let runner = runner(prober, metrics.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        assert_eq!(runner.run_tcp_test("127.0.0.1", open, 3, true).await.len(), 3);
        assert!(runner.run_tcp_test("127.0.0.1", closed, 3, true).await.is_empty());

        let closed_label = closed.to_string();
        let labels = ["127.0.0.1", closed_label.as_str()];
        assert_eq!(metrics.tcp_connection_errors.with_label_values(&labels).get(), 3);
    }

    #[tokio::test]
    async fn test_mixed_tcp_batch_counts_errors_and_publishes() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = Arc::new(ClosingListenerProbe {
            inner: Prober::new(Duration::from_secs(2), metrics.clone()).unwrap(),
            listener: Mutex::new(Some(listener)),
            open_attempts: 2,
            calls: AtomicUsize::new(0),
        });
        let runner = runner(probe, metrics.clone());

        let samples = runner.run_tcp_test("127.0.0.1", port, 5, false).await;
        assert_eq!(samples.len(), 2);

        let port_label = port.to_string();
        let labels = ["127.0.0.1", port_label.as_str()];
        assert_eq!(metrics.tcp_connection_errors.with_label_values(&labels).get(), 3);

        let millis = samples.as_millis();
        let fastest = millis.iter().copied().fold(f64::INFINITY, f64::min);
        let slowest = millis.iter().copied().fold(0.0, f64::max);
        assert_eq!(metrics.tcp_stats.min.with_label_values(&labels).get(), fastest);
        assert_eq!(metrics.tcp_stats.max.with_label_values(&labels).get(), slowest);
        let avg = metrics.tcp_stats.avg.with_label_values(&labels).get();
        assert!(fastest <= avg && avg <= slowest);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scan_isolates_failing_node() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let probe = Arc::new(FlakyNodeProbe {
            bad: "node-3",
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let runner = Arc::new(runner(probe.clone(), metrics));

        let hosts: Vec<String> = (0..25).map(|i| format!("node-{}", i)).collect();
        let results = runner.scan_nodes(&hosts, 22, 2, true).await;

        assert_eq!(results.len(), hosts.len() - 1);
        assert!(!results.contains_key("node-3"));
        assert_eq!(results["node-0"].len(), 2);
        assert!(probe.peak.load(Ordering::SeqCst) <= MAX_SCAN_WORKERS);
    }

    #[tokio::test]
    async fn test_scan_of_nothing() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let runner = Arc::new(runner(Arc::new(ScriptedProbe::new(&[])), metrics));
        assert!(runner.scan_nodes(&[], 22, 3, false).await.is_empty());
    }
}
