//! Health, status and metrics HTTP server.

mod handlers;

use crate::config::Config;
use crate::health::HealthReporter;
use crate::metrics::Metrics;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub health: Arc<HealthReporter>,
    pub metrics: Arc<Metrics>,
    pub started_at: Instant,
}

/// Web server exposing the health reporter.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: Arc<Config>, health: Arc<HealthReporter>, metrics: Arc<Metrics>) -> Self {
        Self {
            state: AppState {
                config,
                health,
                metrics,
                started_at: Instant::now(),
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/healthz", get(handlers::handle_health))
            .route("/status", get(handlers::handle_status))
            .route("/metrics", get(handlers::handle_metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured port and serve in the background until `shutdown` resolves.
    ///
    /// Binding happens before this returns, so a port conflict is reported to the caller.
    pub async fn start<F>(self, shutdown: F) -> Result<JoinHandle<()>, std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.health_port));
        let router = self.routes();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Health server listening on {}", addr);

        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("Health server failed: {}", e);
            }
        }))
    }
}
