//! netprobe - periodic network latency prober
//!
//! Probes HTTP URLs, TCP endpoints, Kubernetes services and nodes, publishes
//! latency statistics as Prometheus metrics and reports its own liveness.

mod config;
mod health;
mod metrics;
mod probe;
mod runner;
mod scheduler;
mod stats;
mod web;

use config::Config;
use health::HealthReporter;
use metrics::Metrics;
use probe::Prober;
use runner::BatchRunner;
use scheduler::{DaemonMode, Scheduler};
use web::Server;

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Kubernetes network speed test with Prometheus metrics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Test HTTP requests
    Http {
        /// URL to test
        #[arg(long)]
        url: String,
        /// Number of requests to run
        #[arg(long, default_value_t = 5)]
        count: u32,
    },
    /// Test TCP connections
    Ping {
        /// Hostname or IP to test
        host: String,
        #[arg(long, default_value_t = 80)]
        port: u16,
        #[arg(long, default_value_t = 10)]
        count: u32,
    },
    /// Test connections to a Kubernetes service
    Service {
        /// Service name
        service: String,
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value_t = 80)]
        port: u16,
        #[arg(long, default_value_t = 10)]
        count: u32,
    },
    /// Test connections to multiple Kubernetes nodes in parallel
    Nodes {
        /// Comma-separated list of node IPs
        #[arg(long, required = true, value_delimiter = ',')]
        nodes: Vec<String>,
        #[arg(long, default_value_t = 22)]
        port: u16,
        /// Number of tests per node
        #[arg(long, default_value_t = 5)]
        count: u32,
    },
    /// Run as a daemon for continuous monitoring
    Daemon {
        /// Probe categories to run each round
        #[arg(long, value_enum, default_value_t = DaemonMode::All)]
        mode: DaemonMode,
        /// Port for the health and metrics server (overrides HEALTH_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("netprobe=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut cfg = Config::from_env()?;

    let metrics = Arc::new(Metrics::new()?);
    let prober = Prober::new(cfg.probe_timeout, metrics.clone())?;
    let runner = Arc::new(BatchRunner::new(Arc::new(prober), metrics.clone()));

    match cli.command {
        Command::Http { url, count } => {
            runner.run_http_test(&url, count, false).await;
        }
        Command::Ping { host, port, count } => {
            runner.run_tcp_test(&host, port, count, false).await;
        }
        Command::Service { service, namespace, port, count } => {
            runner.run_service_test(&service, &namespace, port, count, false).await;
        }
        Command::Nodes { nodes, port, count } => {
            let nodes: Vec<String> = nodes
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
            let results = runner.scan_nodes(&nodes, port, count, false).await;

            tracing::info!("Node scan summary:");
            for node in &nodes {
                match results.get(node) {
                    Some(samples) => tracing::info!(
                        "  {}:{} - {}/{} successful",
                        node, port, samples.len(), count
                    ),
                    None => tracing::info!("  {}:{} - failed", node, port),
                }
            }
        }
        Command::Daemon { mode, port } => {
            if let Some(port) = port {
                cfg.health_port = port;
            }
            run_daemon(Arc::new(cfg), mode, runner, metrics).await?;
        }
    }

    Ok(())
}

/// Serve health/metrics and run the scheduler until SIGINT or SIGTERM.
async fn run_daemon(
    cfg: Arc<Config>,
    mode: DaemonMode,
    runner: Arc<BatchRunner>,
    metrics: Arc<Metrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::info!(
        "Starting netprobe daemon ({:?} mode) with {} targets",
        mode,
        cfg.target_names().len()
    );

    let health = Arc::new(HealthReporter::new(cfg.interval));
    let (stop_tx, _) = broadcast::channel(1);

    let mut server_stop = stop_tx.subscribe();
    let server = Server::new(cfg.clone(), health.clone(), metrics);
    let server_task = server
        .start(async move {
            let _ = server_stop.recv().await;
        })
        .await?;

    let executor = mode.executor(runner, cfg.clone());
    let scheduler_task = Scheduler::new(executor, health, cfg.interval).start(stop_tx.subscribe());

    shutdown_signal().await;
    let _ = stop_tx.send(());

    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task failed: {}", e);
    }
    if let Err(e) = server_task.await {
        tracing::error!("Health server task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_nodes_list() {
        let cli = Cli::try_parse_from([
            "netprobe",
            "nodes",
            "--nodes",
            "10.0.0.1,10.0.0.2",
            "--count",
            "2",
        ])
        .unwrap();
        match cli.command {
            Command::Nodes { nodes, port, count } => {
                assert_eq!(nodes, vec!["10.0.0.1", "10.0.0.2"]);
                assert_eq!(port, 22);
                assert_eq!(count, 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_daemon_defaults_to_all_categories() {
        let cli = Cli::try_parse_from(["netprobe", "daemon"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Daemon {
                mode: DaemonMode::All,
                port: None
            }
        ));

        let cli =
            Cli::try_parse_from(["netprobe", "daemon", "--mode", "nodes", "--port", "9000"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Command::Daemon {
                mode: DaemonMode::Nodes,
                port: Some(9000)
            }
        ));
    }
}
