//! Prometheus metrics published by probes and batch statistics.
//!
//! All instruments live in an explicitly constructed [`Registry`] owned by
//! [`Metrics`], which is shared via `Arc` with everything that publishes.

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::stats::Statistics;

/// min/max/avg/stddev gauges for one target family.
#[derive(Clone)]
pub(crate) struct StatGauges {
    pub(crate) min: GaugeVec,
    pub(crate) max: GaugeVec,
    pub(crate) avg: GaugeVec,
    pub(crate) stddev: GaugeVec,
}

impl StatGauges {
    fn new(
        registry: &Registry,
        prefix: &str,
        what: &str,
        labels: &[&str],
    ) -> Result<Self, prometheus::Error> {
        let gauge = |suffix: &str, help: String| -> Result<GaugeVec, prometheus::Error> {
            let g = GaugeVec::new(Opts::new(format!("{}_{}_ms", prefix, suffix), help), labels)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        Ok(Self {
            min: gauge("min", format!("Minimum {} in milliseconds", what))?,
            max: gauge("max", format!("Maximum {} in milliseconds", what))?,
            avg: gauge("avg", format!("Average {} in milliseconds", what))?,
            stddev: gauge("stddev", format!("Standard deviation of {} in milliseconds", what))?,
        })
    }

    /// Overwrite the gauges for `labels`. A missing stddev leaves the old value in place.
    fn set(&self, labels: &[&str], stats: &Statistics) {
        self.min.with_label_values(labels).set(stats.min);
        self.max.with_label_values(labels).set(stats.max);
        self.avg.with_label_values(labels).set(stats.mean);
        if let Some(stddev) = stats.stddev {
            self.stddev.with_label_values(labels).set(stddev);
        }
    }
}

/// Probe metrics instruments.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub(crate) http_request_time: HistogramVec,
    pub(crate) http_request_errors: IntCounterVec,
    pub(crate) http_response_size: GaugeVec,
    pub(crate) http_stats: StatGauges,
    pub(crate) tcp_connection_time: GaugeVec,
    pub(crate) tcp_connection_errors: IntCounterVec,
    pub(crate) tcp_stats: StatGauges,
}

impl Metrics {
    /// Create the instruments in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(&Registry::new())
    }

    /// Create the instruments and register them with `registry`.
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let http_request_time = HistogramVec::new(
            HistogramOpts::new("http_request_time_seconds", "HTTP request time in seconds"),
            &["url", "status_code"],
        )?;
        registry.register(Box::new(http_request_time.clone()))?;

        let http_request_errors = IntCounterVec::new(
            Opts::new("http_request_errors_total", "Total HTTP request errors"),
            &["url"],
        )?;
        registry.register(Box::new(http_request_errors.clone()))?;

        let http_response_size = GaugeVec::new(
            Opts::new("http_response_size_bytes", "HTTP response size in bytes"),
            &["url", "status_code"],
        )?;
        registry.register(Box::new(http_response_size.clone()))?;

        let http_stats = StatGauges::new(registry, "http_request", "HTTP request time", &["url"])?;

        let tcp_connection_time = GaugeVec::new(
            Opts::new("tcp_connection_time_ms", "TCP connection time in milliseconds"),
            &["target", "port"],
        )?;
        registry.register(Box::new(tcp_connection_time.clone()))?;

        let tcp_connection_errors = IntCounterVec::new(
            Opts::new("tcp_connection_errors_total", "Total TCP connection errors"),
            &["target", "port"],
        )?;
        registry.register(Box::new(tcp_connection_errors.clone()))?;

        let tcp_stats = StatGauges::new(
            registry,
            "tcp_connection",
            "TCP connection time",
            &["target", "port"],
        )?;

        Ok(Self {
            registry: registry.clone(),
            http_request_time,
            http_request_errors,
            http_response_size,
            http_stats,
            tcp_connection_time,
            tcp_connection_errors,
            tcp_stats,
        })
    }

    /// Encode the whole registry in the Prometheus text format.
    ///
    /// Returns the body and its content type.
    pub fn render(&self) -> Result<(Vec<u8>, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((buffer, encoder.format_type().to_string()))
    }

    pub fn record_http_response(&self, url: &str, status_code: u16, elapsed: Duration, size: u64) {
        let status = status_code.to_string();
        self.http_request_time
            .with_label_values(&[url, status.as_str()])
            .observe(elapsed.as_secs_f64());
        self.http_response_size
            .with_label_values(&[url, status.as_str()])
            .set(size as f64);
    }

    pub fn record_http_error(&self, url: &str) {
        self.http_request_errors.with_label_values(&[url]).inc();
    }

    pub fn record_tcp_connect(&self, host: &str, port: u16, elapsed: Duration) {
        let port = port.to_string();
        self.tcp_connection_time
            .with_label_values(&[host, port.as_str()])
            .set(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_tcp_error(&self, host: &str, port: u16) {
        let port = port.to_string();
        self.tcp_connection_errors
            .with_label_values(&[host, port.as_str()])
            .inc();
    }

    pub fn publish_http_stats(&self, url: &str, stats: &Statistics) {
        self.http_stats.set(&[url], stats);
    }

    pub fn publish_tcp_stats(&self, host: &str, port: u16, stats: &Statistics) {
        let port = port.to_string();
        self.tcp_stats.set(&[host, port.as_str()], stats);
    }
}
