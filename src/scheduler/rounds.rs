//! Round executors for each daemon mode.

use async_trait::async_trait;
use std::sync::Arc;

use super::RoundExecutor;
use crate::config::Config;
use crate::runner::BatchRunner;

/// Which probe categories the daemon runs each round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DaemonMode {
    /// Every configured category, in order: HTTP, TCP, services, nodes
    All,
    Http,
    Tcp,
    Service,
    Nodes,
}

impl DaemonMode {
    pub fn executor(self, runner: Arc<BatchRunner>, config: Arc<Config>) -> Arc<dyn RoundExecutor> {
        match self {
            Self::All => Arc::new(CompositeRound::new(vec![
                Box::new(HttpRound::new(runner.clone(), config.clone())),
                Box::new(TcpRound::new(runner.clone(), config.clone())),
                Box::new(ServiceRound::new(runner.clone(), config.clone())),
                Box::new(NodeRound::new(runner, config)),
            ])),
            Self::Http => Arc::new(HttpRound::new(runner, config)),
            Self::Tcp => Arc::new(TcpRound::new(runner, config)),
            Self::Service => Arc::new(ServiceRound::new(runner, config)),
            Self::Nodes => Arc::new(NodeRound::new(runner, config)),
        }
    }
}

macro_rules! round_executor {
    ($name:ident) => {
        pub struct $name {
            runner: Arc<BatchRunner>,
            config: Arc<Config>,
        }

        impl $name {
            pub fn new(runner: Arc<BatchRunner>, config: Arc<Config>) -> Self {
                Self { runner, config }
            }
        }
    };
}

round_executor!(HttpRound);
round_executor!(TcpRound);
round_executor!(ServiceRound);
round_executor!(NodeRound);

#[async_trait]
impl RoundExecutor for HttpRound {
    fn name(&self) -> &str {
        "http"
    }

    async fn run_round(&self) {
        for url in &self.config.http_targets {
            self.runner.run_http_test(url, self.config.http_count, true).await;
        }
    }
}

#[async_trait]
impl RoundExecutor for TcpRound {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn run_round(&self) {
        for target in &self.config.tcp_targets {
            self.runner
                .run_tcp_test(&target.host, target.port, self.config.tcp_count, true)
                .await;
        }
    }
}

#[async_trait]
impl RoundExecutor for ServiceRound {
    fn name(&self) -> &str {
        "service"
    }

    async fn run_round(&self) {
        for svc in &self.config.k8s_services {
            self.runner
                .run_service_test(
                    &svc.name,
                    &svc.namespace,
                    svc.port,
                    self.config.service_count,
                    true,
                )
                .await;
        }
    }
}

#[async_trait]
impl RoundExecutor for NodeRound {
    fn name(&self) -> &str {
        "node"
    }

    async fn run_round(&self) {
        let results = self
            .runner
            .scan_nodes(&self.config.nodes, self.config.node_port, self.config.node_count, true)
            .await;
        let unreachable = results.values().filter(|s| s.is_empty()).count();
        if unreachable > 0 {
            tracing::warn!("{} of {} nodes unreachable", unreachable, self.config.nodes.len());
        }
    }
}

/// Runs several executors one after another.
pub struct CompositeRound {
    executors: Vec<Box<dyn RoundExecutor>>,
}

impl CompositeRound {
    pub fn new(executors: Vec<Box<dyn RoundExecutor>>) -> Self {
        Self { executors }
    }
}

#[async_trait]
impl RoundExecutor for CompositeRound {
    fn name(&self) -> &str {
        "all"
    }

    async fn run_round(&self) {
        for executor in &self.executors {
            executor.run_round().await;
        }
    }
}
