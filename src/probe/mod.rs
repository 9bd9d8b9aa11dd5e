//! Probe module for network monitoring.
//!
//! Supports HTTP GET and TCP connect probes. A probe never fails: transport
//! errors are folded into the returned [`ProbeResult`] and counted in metrics.

mod http;
mod tcp;

pub use http::*;
pub use tcp::*;

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::metrics::Metrics;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// An endpoint under test.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Http { url: String },
    Tcp { host: String, port: u16 },
    K8sService {
        service: String,
        namespace: String,
        port: u16,
    },
    K8sNode { host: String, port: u16 },
}

impl Target {
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http { url: url.into() }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn service(service: impl Into<String>, namespace: impl Into<String>, port: u16) -> Self {
        Self::K8sService {
            service: service.into(),
            namespace: namespace.into(),
            port,
        }
    }

    pub fn node(host: impl Into<String>, port: u16) -> Self {
        Self::K8sNode {
            host: host.into(),
            port,
        }
    }

    /// Host and port for connection-based targets. Services resolve to their cluster DNS name.
    pub fn socket_addr(&self) -> Option<(Cow<'_, str>, u16)> {
        match self {
            Self::Http { .. } => None,
            Self::Tcp { host, port } | Self::K8sNode { host, port } => {
                Some((Cow::Borrowed(host.as_str()), *port))
            }
            Self::K8sService {
                service,
                namespace,
                port,
            } => Some((Cow::Owned(service_host(service, namespace)), *port)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "HTTP request",
            Self::Tcp { .. } => "TCP connection",
            Self::K8sService { .. } => "service connection",
            Self::K8sNode { .. } => "node connection",
        }
    }
}

fn service_host(service: &str, namespace: &str) -> String {
    format!("{}.{}.svc.cluster.local", service, namespace)
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.socket_addr()) {
            (Self::Http { url }, _) => f.write_str(url),
            (_, Some((host, port))) => write!(f, "{}:{}", host, port),
            (_, None) => Ok(()),
        }
    }
}

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub success: bool,
    pub elapsed: Duration,
    pub status_code: Option<u16>,
    pub size_bytes: Option<u64>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn connected(elapsed: Duration) -> Self {
        Self {
            success: true,
            elapsed,
            status_code: None,
            size_bytes: None,
            error: None,
        }
    }

    pub fn responded(response: &HttpResponse) -> Self {
        Self {
            success: true,
            elapsed: response.elapsed,
            status_code: Some(response.status_code),
            size_bytes: Some(response.size_bytes),
            error: None,
        }
    }

    pub fn failed(elapsed: Duration, error: &ProbeError) -> Self {
        Self {
            success: false,
            elapsed,
            status_code: None,
            size_bytes: None,
            error: Some(error.to_string()),
        }
    }
}

/// A single-attempt measurement against one target.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &Target) -> ProbeResult;
}

/// The network prober: real HTTP and TCP probes recording into [`Metrics`].
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Prober {
    pub fn new(timeout: Duration, metrics: Arc<Metrics>) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            metrics,
        })
    }

    async fn probe_http(&self, url: &str) -> ProbeResult {
        let start = tokio::time::Instant::now();
        match run_http_probe(&self.client, url, self.timeout).await {
            Ok(response) => {
                self.metrics.record_http_response(
                    url,
                    response.status_code,
                    response.elapsed,
                    response.size_bytes,
                );
                ProbeResult::responded(&response)
            }
            Err(e) => {
                tracing::error!("Error requesting {} - {}", url, e);
                self.metrics.record_http_error(url);
                ProbeResult::failed(start.elapsed(), &e)
            }
        }
    }

    async fn probe_tcp(&self, host: &str, port: u16) -> ProbeResult {
        let start = tokio::time::Instant::now();
        match run_tcp_probe(host, port, self.timeout).await {
            Ok(elapsed) => {
                self.metrics.record_tcp_connect(host, port, elapsed);
                ProbeResult::connected(elapsed)
            }
            Err(e) => {
                tracing::error!("Error connecting to {}:{} - {}", host, port, e);
                self.metrics.record_tcp_error(host, port);
                ProbeResult::failed(start.elapsed(), &e)
            }
        }
    }
}

#[async_trait]
impl Probe for Prober {
    async fn probe(&self, target: &Target) -> ProbeResult {
        match target {
            Target::Http { url } => self.probe_http(url).await,
            Target::Tcp { host, port } | Target::K8sNode { host, port } => {
                self.probe_tcp(host, *port).await
            }
            Target::K8sService {
                service,
                namespace,
                port,
            } => self.probe_tcp(&service_host(service, namespace), *port).await,
        }
    }
}
