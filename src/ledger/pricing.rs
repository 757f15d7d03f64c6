//! Pricing snapshots and the external pricing-source boundary.
//!
//! The ledger never guesses a price: a missing or unrefreshable snapshot
//! fails the estimate with [`crate::Error::PricingUnavailable`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{ModelKey, TokenUsage};
use crate::{Error, Result};

/// Per-token rates for one model, as last synced from the pricing source.
/// Read-only to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub key: ModelKey,
    pub input_cost_per_token: Decimal,
    pub output_cost_per_token: Decimal,
    pub synced_at: DateTime<Utc>,
}

impl PricingSnapshot {
    pub fn cost_for(&self, usage: &TokenUsage) -> Decimal {
        Decimal::from(usage.input_tokens) * self.input_cost_per_token
            + Decimal::from(usage.output_tokens) * self.output_cost_per_token
    }
}

/// External pricing feed. Implementations are expected to be cheap to call
/// repeatedly; the ledger caches snapshots and refreshes on an interval.
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn current_pricing(&self, key: &ModelKey) -> Result<PricingSnapshot>;
}

/// Fixed price table for tests and deployments without a live feed.
#[derive(Debug, Default)]
pub struct StaticPricingSource {
    rates: HashMap<ModelKey, (Decimal, Decimal)>,
}

impl StaticPricingSource {
    pub fn builder() -> StaticPricingBuilder {
        StaticPricingBuilder::default()
    }
}

#[async_trait]
impl PricingSource for StaticPricingSource {
    async fn current_pricing(&self, key: &ModelKey) -> Result<PricingSnapshot> {
        let (input_cost_per_token, output_cost_per_token) = self
            .rates
            .get(key)
            .copied()
            .ok_or_else(|| Error::PricingUnavailable { key: key.clone() })?;

        Ok(PricingSnapshot {
            key: key.clone(),
            input_cost_per_token,
            output_cost_per_token,
            synced_at: Utc::now(),
        })
    }
}

#[derive(Debug, Default)]
pub struct StaticPricingBuilder {
    rates: HashMap<ModelKey, (Decimal, Decimal)>,
}

impl StaticPricingBuilder {
    pub fn model(
        mut self,
        key: ModelKey,
        input_cost_per_token: Decimal,
        output_cost_per_token: Decimal,
    ) -> Self {
        self.rates
            .insert(key, (input_cost_per_token, output_cost_per_token));
        self
    }

    pub fn build(self) -> StaticPricingSource {
        StaticPricingSource { rates: self.rates }
    }
}

/// Snapshot cache in front of a [`PricingSource`]. A snapshot older than
/// `max_age` is refreshed through the source; a failed refresh fails the
/// caller rather than serving the stale value.
pub(crate) struct PricingCache {
    source: Arc<dyn PricingSource>,
    max_age: Duration,
    snapshots: DashMap<ModelKey, (Instant, PricingSnapshot)>,
}

impl PricingCache {
    pub(crate) fn new(source: Arc<dyn PricingSource>, max_age: Duration) -> Self {
        Self {
            source,
            max_age,
            snapshots: DashMap::new(),
        }
    }

    pub(crate) async fn get(&self, key: &ModelKey) -> Result<PricingSnapshot> {
        if let Some(slot) = self.snapshots.get(key) {
            let (fetched_at, snapshot) = slot.value();
            if fetched_at.elapsed() < self.max_age {
                return Ok(snapshot.clone());
            }
        }

        let snapshot = self.source.current_pricing(key).await?;
        self.snapshots
            .insert(key.clone(), (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }
}
