//! Bounded rolling window of latency samples with percentile statistics.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed provider call. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySample {
    pub duration_ms: u64,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl LatencySample {
    pub fn new(duration_ms: u64, success: bool) -> Self {
        Self {
            duration_ms,
            success,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WindowConfig {
    /// Most recent samples retained per (provider, model) key.
    pub max_samples: usize,
    /// Optional trailing time span; samples older than this are evicted.
    pub max_age: Option<Duration>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_samples: 256,
            max_age: None,
        }
    }
}

/// Statistics over the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub count: usize,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
pub struct LatencyWindow {
    samples: VecDeque<LatencySample>,
}

impl LatencyWindow {
    pub fn push(&mut self, sample: LatencySample, config: &WindowConfig) {
        self.samples.push_back(sample);
        self.trim(config);
    }

    fn trim(&mut self, config: &WindowConfig) {
        while self.samples.len() > config.max_samples {
            self.samples.pop_front();
        }
        if let Some(max_age) = config.max_age {
            let cutoff = Utc::now()
                - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
            while self
                .samples
                .front()
                .is_some_and(|s| s.recorded_at < cutoff)
            {
                self.samples.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Nearest-rank percentile (`rank = ceil(q * n)`, 1-indexed) over a
    /// sorted copy of the window. Insertion order does not matter.
    /// Returns 0 when no samples exist.
    pub fn percentile(&self, quantile: f64) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.samples.iter().map(|s| s.duration_ms).collect();
        sorted.sort_unstable();
        let rank = (quantile * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    pub fn stats(&self) -> LatencyStats {
        let count = self.samples.len();
        let success_rate = if count == 0 {
            0.0
        } else {
            let successes = self.samples.iter().filter(|s| s.success).count();
            successes as f64 / count as f64
        };

        LatencyStats {
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
            count,
            success_rate,
        }
    }
}
