//! Per-model circuit breaker.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

#[derive(Clone, Debug)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Breaker state for a single (provider, model) key.
///
/// No half-open state is persisted: once the cooldown elapses the breaker
/// reports `Closed` and a trial request goes through. A failure during the
/// trial re-opens immediately, a success fully resets. Mutation happens
/// under the router's per-key lock, so the struct itself carries no
/// synchronization.
#[derive(Debug, Default)]
pub struct ModelCircuit {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl ModelCircuit {
    pub fn state(&self, config: &CircuitConfig) -> CircuitState {
        match self.opened_at {
            Some(opened_at)
                if self.consecutive_failures >= config.failure_threshold
                    && opened_at.elapsed() < config.cooldown =>
            {
                CircuitState::Open
            }
            _ => CircuitState::Closed,
        }
    }

    pub fn is_available(&self, config: &CircuitConfig) -> bool {
        self.state(config) == CircuitState::Closed
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    /// Returns the state after the failure, so the caller can log transitions.
    pub fn record_failure(&mut self, config: &CircuitConfig) -> CircuitState {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= config.failure_threshold {
            self.opened_at = Some(Instant::now());
        }
        self.state(config)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn reset(&mut self) {
        self.record_success();
    }
}
