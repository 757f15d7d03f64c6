//! Live per-model latency statistics and latency-aware candidate selection.
//!
//! Tracks a bounded rolling window of samples per (provider, model) key,
//! opens a circuit breaker after consecutive failures, and picks the best
//! available candidate for a latency-sensitive request. All state is
//! per-key; there is no global lock.

mod circuit;
mod window;

pub use circuit::{CircuitConfig, CircuitState, ModelCircuit};
pub use window::{LatencySample, LatencyStats, LatencyWindow, WindowConfig};

use std::sync::Mutex;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::ModelKey;
use crate::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct RouterConfig {
    pub window: WindowConfig,
    pub circuit: CircuitConfig,
}

/// A model the caller is willing to route to, with its estimated cost for
/// the request at hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub key: ModelKey,
    pub estimated_cost: Decimal,
}

impl RouteCandidate {
    pub fn new(key: ModelKey, estimated_cost: Decimal) -> Self {
        Self {
            key,
            estimated_cost,
        }
    }
}

#[derive(Debug, Default)]
struct ModelEntry {
    window: LatencyWindow,
    circuit: ModelCircuit,
}

/// Router over the fleet of (provider, model) pairs.
#[derive(Debug, Default)]
pub struct LatencyRouter {
    config: RouterConfig,
    entries: DashMap<ModelKey, Mutex<ModelEntry>>,
}

impl LatencyRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Records one provider call: appends a sample to the rolling window
    /// and advances the circuit breaker.
    pub fn track_latency(&self, key: &ModelKey, duration_ms: u64, success: bool) {
        let slot = self.entries.entry(key.clone()).or_default();
        let mut entry = slot.lock().unwrap_or_else(|e| e.into_inner());

        entry
            .window
            .push(LatencySample::new(duration_ms, success), &self.config.window);

        if success {
            entry.circuit.record_success();
        } else {
            let before = entry.circuit.state(&self.config.circuit);
            let after = entry.circuit.record_failure(&self.config.circuit);
            if before == CircuitState::Closed && after == CircuitState::Open {
                tracing::warn!(
                    model = %key,
                    failures = entry.circuit.consecutive_failures(),
                    "circuit opened"
                );
            }
        }
    }

    /// p95 over the current window; 0 when no samples exist.
    pub fn latency_p95(&self, key: &ModelKey) -> u64 {
        self.with_entry(key, |entry| entry.window.percentile(0.95))
            .unwrap_or(0)
    }

    pub fn latency_stats(&self, key: &ModelKey) -> LatencyStats {
        self.with_entry(key, |entry| entry.window.stats())
            .unwrap_or_default()
    }

    /// False iff the circuit for this key is open. Unknown keys are
    /// optimistically available.
    pub fn is_available(&self, key: &ModelKey) -> bool {
        self.with_entry(key, |entry| entry.circuit.is_available(&self.config.circuit))
            .unwrap_or(true)
    }

    /// Picks a candidate: among circuit-available ones whose p95 meets the
    /// latency bound, the cheapest wins (first in input order on cost
    /// ties); when none meet the bound, the lowest-p95 available candidate
    /// is returned instead. Errors only when every candidate is
    /// circuit-open or the list is empty.
    pub fn select_by_latency(
        &self,
        max_latency_ms: u64,
        candidates: &[RouteCandidate],
    ) -> Result<RouteCandidate> {
        let available: Vec<(&RouteCandidate, u64)> = candidates
            .iter()
            .filter(|c| self.is_available(&c.key))
            .map(|c| (c, self.latency_p95(&c.key)))
            .collect();

        if available.is_empty() {
            return Err(Error::NoAvailableModel);
        }

        let mut cheapest: Option<&(&RouteCandidate, u64)> = None;
        for item in available.iter().filter(|(_, p95)| *p95 <= max_latency_ms) {
            match cheapest {
                Some((best, _)) if item.0.estimated_cost >= best.estimated_cost => {}
                _ => cheapest = Some(item),
            }
        }
        if let Some((candidate, p95)) = cheapest {
            tracing::debug!(model = %candidate.key, p95 = *p95, "selected within latency bound");
            return Ok((*candidate).clone());
        }

        // Nothing meets the bound: degrade to the fastest available candidate.
        let mut fastest = &available[0];
        for item in &available[1..] {
            if item.1 < fastest.1 {
                fastest = item;
            }
        }
        tracing::debug!(
            model = %fastest.0.key,
            p95 = fastest.1,
            max_latency_ms,
            "no candidate met the latency bound, falling back to fastest"
        );
        Ok(fastest.0.clone())
    }

    /// Resets window and circuit state for a key. Administrative utility,
    /// also used for test isolation.
    pub fn clear(&self, key: &ModelKey) {
        if let Some(slot) = self.entries.get(key) {
            let mut entry = slot.lock().unwrap_or_else(|e| e.into_inner());
            entry.window.clear();
            entry.circuit.reset();
        }
    }

    /// Current stats for every tracked key.
    pub fn snapshot(&self) -> Vec<(ModelKey, LatencyStats)> {
        self.entries
            .iter()
            .map(|slot| {
                let entry = slot.value().lock().unwrap_or_else(|e| e.into_inner());
                (slot.key().clone(), entry.window.stats())
            })
            .collect()
    }

    fn with_entry<T>(&self, key: &ModelKey, f: impl FnOnce(&ModelEntry) -> T) -> Option<T> {
        self.entries.get(key).map(|slot| {
            let entry = slot.lock().unwrap_or_else(|e| e.into_inner());
            f(&entry)
        })
    }
}
