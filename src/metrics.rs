//! Local atomic metrics for gateway admission outcomes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe atomic gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Admission-outcome counters kept by the dispatcher.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub requests_total: Counter,
    pub cache_served: Counter,
    pub admitted: Counter,
    pub queued: Counter,
    pub rejected: Counter,
    pub completed: Counter,
    pub failed: Counter,
    pub abandoned: Counter,
    pub in_flight: Gauge,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            requests_total: self.requests_total.get(),
            cache_served: self.cache_served.get(),
            admitted: self.admitted.get(),
            queued: self.queued.get(),
            rejected: self.rejected.get(),
            completed: self.completed.get(),
            failed: self.failed.get(),
            abandoned: self.abandoned.get(),
            in_flight: self.in_flight.get(),
        }
    }
}

/// Point-in-time snapshot for export/display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub requests_total: u64,
    pub cache_served: u64,
    pub admitted: u64,
    pub queued: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub in_flight: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge_goes_negative_without_panic() {
        let gauge = Gauge::new();
        gauge.dec();
        assert_eq!(gauge.get(), -1);
        gauge.inc();
        gauge.inc();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_summary_snapshot() {
        let metrics = GatewayMetrics::new();
        metrics.requests_total.inc();
        metrics.admitted.inc();
        metrics.in_flight.inc();

        let summary = metrics.summary();
        assert_eq!(summary.requests_total, 1);
        assert_eq!(summary.admitted, 1);
        assert_eq!(summary.in_flight, 1);
    }
}
