//! Process health derived from how recently a scheduled round completed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Snapshot of the daemon's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub last_test_run: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Owner of the process-wide [`HealthState`].
///
/// Written by the scheduler (`record_round_complete`) and by health checks
/// (`evaluate`); everyone else reads a `snapshot`.
pub struct HealthReporter {
    interval: Duration,
    state: RwLock<HealthState>,
}

impl HealthReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: RwLock::new(HealthState {
                status: HealthStatus::Healthy,
                last_check: Utc::now(),
                last_test_run: None,
                errors: Vec::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> HealthState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stamp the completion time of a scheduled round.
    pub fn record_round_complete(&self, at: DateTime<Utc>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_test_run = Some(at);
    }

    /// Recompute health as of `now`.
    ///
    /// Unhealthy when no round has completed, or the last one finished more
    /// than twice the interval ago. Status and errors are overwritten each call.
    pub fn evaluate(&self, now: DateTime<Utc>) -> HealthState {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_check = now;

        let deadline = self.interval.checked_mul(2).unwrap_or(Duration::MAX);
        let problem = match state.last_test_run {
            None => Some("No test round has completed yet".to_string()),
            Some(last) => {
                // A clock step backwards makes the age negative; treat that as fresh.
                let age = (now - last).to_std().unwrap_or_default();
                (age > deadline).then(|| {
                    format!(
                        "Tests not running within expected interval: last round finished {}s ago, expected within {}s",
                        age.as_secs(),
                        deadline.as_secs()
                    )
                })
            }
        };

        match problem {
            Some(message) => {
                state.status = HealthStatus::Unhealthy;
                state.errors = vec![message];
            }
            None => {
                state.status = HealthStatus::Healthy;
                state.errors.clear();
            }
        }

        state.clone()
    }
}
