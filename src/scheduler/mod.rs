//! Scheduler module for running probe rounds on a fixed interval.

mod rounds;

pub use rounds::*;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::health::HealthReporter;

/// One full round across the configured probe categories.
#[async_trait]
pub trait RoundExecutor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run every configured batch once. Individual target failures must not abort the round.
    async fn run_round(&self);
}

/// Runs rounds forever: one immediately, then one per interval tick.
pub struct Scheduler {
    executor: Arc<dyn RoundExecutor>,
    health: Arc<HealthReporter>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        executor: Arc<dyn RoundExecutor>,
        health: Arc<HealthReporter>,
        interval: Duration,
    ) -> Self {
        Self {
            executor,
            health,
            interval,
        }
    }

    /// Run one round and stamp its completion on the health state.
    pub async fn run_scheduled_round(&self) {
        tracing::info!("Starting scheduled {} network tests", self.executor.name());
        let started = Instant::now();

        self.executor.run_round().await;
        self.health.record_round_complete(Utc::now());

        tracing::info!(
            "Scheduled {} network tests finished in {:.2}s",
            self.executor.name(),
            started.elapsed().as_secs_f64()
        );
    }

    /// Spawn the loop. It exits after the current round once `stop_rx` fires.
    pub fn start(self, stop_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop_rx))
    }

    async fn run(self, mut stop_rx: broadcast::Receiver<()>) {
        tracing::info!(
            "Setting up scheduled tests to run every {} seconds",
            self.interval.as_secs()
        );

        // The first tick completes immediately, giving the initial round.
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.run_scheduled_round().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the start time of each round and optionally takes a while.
    struct RecordingRound {
        starts: Mutex<Vec<Instant>>,
        duration: Duration,
    }

    impl RecordingRound {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                starts: Mutex::new(Vec::new()),
                duration,
            })
        }

        fn starts(&self) -> Vec<Instant> {
            self.starts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RoundExecutor for RecordingRound {
        fn name(&self) -> &str {
            "recording"
        }

        async fn run_round(&self) {
            self.starts.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.duration).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_round_is_immediate_then_every_interval() {
        let round = RecordingRound::new(Duration::ZERO);
        let health = Arc::new(HealthReporter::new(Duration::from_secs(60)));
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let origin = Instant::now();
        let handle =
            Scheduler::new(round.clone(), health.clone(), Duration::from_secs(60)).start(stop_rx);

        tokio::time::sleep(Duration::from_secs(125)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        let offsets: Vec<u64> = round.starts().iter().map(|t| (*t - origin).as_secs()).collect();
        assert_eq!(offsets, vec![0, 60, 120]);
        assert!(health.snapshot().last_test_run.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_round_is_followed_immediately() {
        let round = RecordingRound::new(Duration::from_secs(90));
        let health = Arc::new(HealthReporter::new(Duration::from_secs(60)));
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let origin = Instant::now();
        let handle = Scheduler::new(round.clone(), health, Duration::from_secs(60)).start(stop_rx);

        tokio::time::sleep(Duration::from_secs(200)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        let offsets: Vec<u64> = round.starts().iter().map(|t| (*t - origin).as_secs()).collect();
        assert_eq!(offsets, vec![0, 90, 180]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_the_running_round_finish() {
        let round = RecordingRound::new(Duration::from_secs(30));
        let health = Arc::new(HealthReporter::new(Duration::from_secs(60)));
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let handle =
            Scheduler::new(round.clone(), health.clone(), Duration::from_secs(60)).start(stop_rx);

        // Stop arrives mid-round.
        tokio::time::sleep(Duration::from_secs(10)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(round.starts().len(), 1);
        assert!(health.snapshot().last_test_run.is_some());
    }
}
