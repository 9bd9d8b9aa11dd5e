//! Configuration module for netprobe.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The resulting [`Config`] is an immutable snapshot shared by reference.

use serde::Serialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// A raw TCP target (`host[:port]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TcpTarget {
    pub host: String,
    pub port: u16,
}

/// A Kubernetes service target (`service[.namespace][:port]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTarget {
    pub name: String,
    pub namespace: String,
    pub port: u16,
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time between scheduled rounds (default: 60s)
    pub interval: Duration,
    /// Timeout applied to every single probe (default: 5s)
    pub probe_timeout: Duration,
    /// Port for the health/metrics server (default: 8080)
    pub health_port: u16,
    pub http_targets: Vec<String>,
    pub http_count: u32,
    pub tcp_targets: Vec<TcpTarget>,
    pub tcp_count: u32,
    pub k8s_services: Vec<ServiceTarget>,
    pub service_count: u32,
    pub nodes: Vec<String>,
    pub node_port: u16,
    pub node_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            health_port: 8080,
            http_targets: Vec::new(),
            http_count: 3,
            tcp_targets: Vec::new(),
            tcp_count: 5,
            k8s_services: Vec::new(),
            service_count: 5,
            nodes: Vec::new(),
            node_port: 22,
            node_count: 3,
        }
    }
}

const DEFAULT_TARGET_PORT: u16 = 80;
/// Upper bound for `NETWORK_TEST_INTERVAL` and `PROBE_TIMEOUT`, in seconds.
const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_NAMESPACE: &str = "default";

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETWORK_TEST_INTERVAL`: seconds between rounds (default: 60)
    /// - `PROBE_TIMEOUT`: per-probe timeout in seconds (default: 5)
    /// - `HEALTH_PORT`: health/metrics server port (default: 8080)
    /// - `HTTP_TARGETS`, `HTTP_COUNT` (default: 3)
    /// - `TCP_TARGETS`, `TCP_COUNT` (default: 5)
    /// - `K8S_SERVICES`, `SERVICE_COUNT` (default: 5)
    /// - `K8S_NODES`, `NODE_PORT` (default: 22), `NODE_COUNT` (default: 3)
    ///
    /// Unlike missing variables, malformed values are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(interval) = parse_seconds(&lookup, "NETWORK_TEST_INTERVAL")? {
            cfg.interval = interval;
        }
        if let Some(timeout) = parse_seconds(&lookup, "PROBE_TIMEOUT")? {
            cfg.probe_timeout = timeout;
        }
        if let Some(port) = parse_positive(&lookup, "HEALTH_PORT")? {
            cfg.health_port = port;
        }

        if let Some(raw) = lookup("HTTP_TARGETS") {
            cfg.http_targets = split_list(&raw).map(str::to_string).collect();
        }
        if let Some(count) = parse_positive(&lookup, "HTTP_COUNT")? {
            cfg.http_count = count;
        }

        if let Some(raw) = lookup("TCP_TARGETS") {
            cfg.tcp_targets = split_list(&raw)
                .map(parse_tcp_target)
                .collect::<Result<_, _>>()?;
        }
        if let Some(count) = parse_positive(&lookup, "TCP_COUNT")? {
            cfg.tcp_count = count;
        }

        if let Some(raw) = lookup("K8S_SERVICES") {
            cfg.k8s_services = split_list(&raw)
                .map(parse_service_target)
                .collect::<Result<_, _>>()?;
        }
        if let Some(count) = parse_positive(&lookup, "SERVICE_COUNT")? {
            cfg.service_count = count;
        }

        if let Some(raw) = lookup("K8S_NODES") {
            cfg.nodes = split_list(&raw).map(str::to_string).collect();
        }
        if let Some(port) = parse_positive(&lookup, "NODE_PORT")? {
            cfg.node_port = port;
        }
        if let Some(count) = parse_positive(&lookup, "NODE_COUNT")? {
            cfg.node_count = count;
        }

        Ok(cfg)
    }

    /// Every configured target, identified the way metrics label them.
    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.http_targets.iter().map(|u| redact_url(u)).collect();
        names.extend(self.tcp_targets.iter().map(|t| format!("{}:{}", t.host, t.port)));
        names.extend(self.k8s_services.iter().map(|s| {
            format!("{}.{}.svc.cluster.local:{}", s.name, s.namespace, s.port)
        }));
        names.extend(self.nodes.iter().map(|n| format!("{}:{}", n, self.node_port)));
        names
    }

    /// A serializable view of the configuration with credentials removed.
    pub fn view(&self) -> ConfigView {
        ConfigView {
            interval_seconds: self.interval.as_secs(),
            probe_timeout_seconds: self.probe_timeout.as_secs_f64(),
            health_port: self.health_port,
            http_targets: self.http_targets.iter().map(|u| redact_url(u)).collect(),
            http_count: self.http_count,
            tcp_targets: self.tcp_targets.clone(),
            tcp_count: self.tcp_count,
            k8s_services: self.k8s_services.clone(),
            service_count: self.service_count,
            nodes: self.nodes.clone(),
            node_port: self.node_port,
            node_count: self.node_count,
        }
    }
}

/// Configuration as exposed on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub interval_seconds: u64,
    pub probe_timeout_seconds: f64,
    pub health_port: u16,
    pub http_targets: Vec<String>,
    pub http_count: u32,
    pub tcp_targets: Vec<TcpTarget>,
    pub tcp_count: u32,
    pub k8s_services: Vec<ServiceTarget>,
    pub service_count: u32,
    pub nodes: Vec<String>,
    pub node_port: u16,
    pub node_count: u32,
}

/// Replace any password embedded in a URL.
pub fn redact_url(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("REDACTED"));
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let value: T = raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(value))
}

fn parse_seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match parse_positive::<u64>(lookup, var)? {
        Some(secs) if secs > MAX_DURATION_SECS => Err(ConfigError::Invalid {
            var,
            value: secs.to_string(),
            reason: format!("must be at most {} seconds", MAX_DURATION_SECS),
        }),
        other => Ok(other.map(Duration::from_secs)),
    }
}

fn parse_port(var: &'static str, entry: &str, port: Option<&str>) -> Result<u16, ConfigError> {
    match port {
        None => Ok(DEFAULT_TARGET_PORT),
        Some(p) => p.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            var,
            value: entry.to_string(),
            reason: format!("bad port: {}", e),
        }),
    }
}

/// Split `name[:port[:...]]`. Fields after the port are ignored.
fn split_host_port(entry: &str) -> (&str, Option<&str>) {
    let mut fields = entry.split(':');
    let host = fields.next().unwrap_or_default();
    (host, fields.next())
}

fn parse_tcp_target(entry: &str) -> Result<TcpTarget, ConfigError> {
    let (host, port) = split_host_port(entry);
    if host.is_empty() {
        return Err(ConfigError::Invalid {
            var: "TCP_TARGETS",
            value: entry.to_string(),
            reason: "empty host".to_string(),
        });
    }
    Ok(TcpTarget {
        host: host.to_string(),
        port: parse_port("TCP_TARGETS", entry, port)?,
    })
}

fn parse_service_target(entry: &str) -> Result<ServiceTarget, ConfigError> {
    let (qualified, port) = split_host_port(entry);
    let mut parts = qualified.split('.');
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        return Err(ConfigError::Invalid {
            var: "K8S_SERVICES",
            value: entry.to_string(),
            reason: "empty service name".to_string(),
        });
    }
    let namespace = parts
        .next()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);

    Ok(ServiceTarget {
        name: name.to_string(),
        namespace: namespace.to_string(),
        port: parse_port("K8S_SERVICES", entry, port)?,
    })
}
