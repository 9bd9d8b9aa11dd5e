//! Latency sample sets and their summary statistics.

use serde::Serialize;
use std::time::Duration;

/// Successful latencies of one batch, in milliseconds, in probe order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet(Vec<f64>);

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, elapsed: Duration) {
        self.0.push(elapsed.as_nanos() as f64 / 1_000_000.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_millis(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for SampleSet {
    fn from(millis: Vec<f64>) -> Self {
        Self(millis)
    }
}

/// Summary of one sample set. `stddev` needs at least two samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: Option<f64>,
}

impl Statistics {
    /// Compute statistics over millisecond samples.
    ///
    /// Returns `None` for an empty slice so callers publish nothing rather than zeros.
    /// The standard deviation uses the sample (n - 1) formula.
    pub fn from_millis(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = samples.iter().sum::<f64>() / n;

        let stddev = (samples.len() > 1).then(|| {
            let sum_sq: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();
            (sum_sq / (n - 1.0)).sqrt()
        });

        // Rounding in the mean can leave it a hair outside [min, max].
        Some(Self {
            min,
            max,
            mean: mean.clamp(min, max),
            stddev,
        })
    }
}

/// Aggregate a sample set.
pub fn aggregate(samples: &SampleSet) -> Option<Statistics> {
    Statistics::from_millis(samples.as_millis())
}
