//! Thin pass-through composing the four components for one request:
//! cache lookup, admission check, budget reservation, latency-aware model
//! selection, and the matching completion/cleanup paths.
//!
//! Provider invocation itself happens outside this crate; the dispatcher
//! owns the cleanup policy around it. An abandoned request releases its
//! reservation and records no latency sample unless the provider call
//! genuinely started.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache::{
    CacheConfig, CacheHit, CacheOptions, CacheScope, EmbeddingProvider, ResponseCache,
};
use crate::ledger::{BudgetLedger, LedgerConfig, PricingSource};
use crate::metrics::GatewayMetrics;
use crate::queue::{PriorityQueue, QueueConfig, QueuedRequest};
use crate::router::{LatencyRouter, RouteCandidate, RouterConfig};
use crate::types::{ModelKey, TokenUsage, UserTier};
use crate::{Error, Result};

#[derive(Clone, Default)]
pub struct GatewayConfig {
    pub router: RouterConfig,
    pub ledger: LedgerConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
}

/// One inbound inference request. `candidates` is in preference order;
/// the first entry scopes the cache lookup.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub user_id: String,
    pub project_id: Option<String>,
    pub tier: UserTier,
    pub prompt: String,
    pub candidates: Vec<ModelKey>,
    pub max_latency_ms: u64,
    pub expected_usage: TokenUsage,
    pub cache: CacheOptions,
}

/// Admission outcome for a request that was not rejected outright.
#[derive(Debug)]
pub enum Admission {
    /// Answered from the cache; no provider call happens.
    Cached(CacheHit),
    /// Admitted: the caller invokes the provider, then resolves the
    /// ticket through `complete`, `fail`, or `abandon`.
    Proceed(Ticket),
    /// Over capacity; the request is parked in the priority queue.
    Queued { request_id: Uuid, queue_depth: usize },
}

/// Handle for an admitted request. Exactly one of `complete`, `fail`, or
/// `abandon` resolves it, mirroring the reservation lifecycle underneath.
#[derive(Debug)]
pub struct Ticket {
    pub request_id: Uuid,
    pub user_id: String,
    pub reservation_id: Uuid,
    pub selected: RouteCandidate,
    pub reserved_amount: Decimal,
    pub admitted_at: Instant,
}

pub struct Dispatcher {
    router: LatencyRouter,
    ledger: BudgetLedger,
    cache: ResponseCache,
    queue: PriorityQueue<InferenceRequest>,
    metrics: GatewayMetrics,
}

impl Dispatcher {
    pub fn new(
        config: GatewayConfig,
        pricing: Arc<dyn PricingSource>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            router: LatencyRouter::new(config.router),
            ledger: BudgetLedger::new(config.ledger, pricing),
            cache: ResponseCache::new(config.cache, embedder),
            queue: PriorityQueue::new(config.queue),
            metrics: GatewayMetrics::new(),
        }
    }

    /// Runs the admission pipeline: cache -> capacity -> estimate ->
    /// reserve -> select. On selection exhaustion the reservation is
    /// released before the error surfaces.
    pub async fn admit(&self, request: InferenceRequest) -> Result<Admission> {
        self.metrics.requests_total.inc();

        let preferred = request
            .candidates
            .first()
            .cloned()
            .ok_or(Error::NoAvailableModel)?;

        let scope = CacheScope::new(request.user_id.clone(), preferred);
        if let Some(hit) = self.cache.check(&request.prompt, &scope, &request.cache).await {
            self.metrics.cache_served.inc();
            return Ok(Admission::Cached(hit));
        }

        if self.queue.is_over_capacity() {
            let tier = request.tier;
            let request_id = self.queue.enqueue_for_tier(request, tier);
            self.metrics.queued.inc();
            tracing::debug!(%request_id, "over capacity, request queued");
            return Ok(Admission::Queued {
                request_id,
                queue_depth: self.queue.len(),
            });
        }

        let costs = futures::future::try_join_all(
            request
                .candidates
                .iter()
                .map(|key| self.ledger.estimate_cost(key, &request.expected_usage)),
        )
        .await?;

        let mut reserve_amount = Decimal::ZERO;
        let candidates: Vec<RouteCandidate> = request
            .candidates
            .iter()
            .zip(costs)
            .map(|(key, cost)| {
                reserve_amount = reserve_amount.max(cost);
                RouteCandidate::new(key.clone(), cost)
            })
            .collect();

        // Reserve the largest candidate estimate so any selection is covered.
        let reservation_id = match self.ledger.reserve(
            &request.user_id,
            reserve_amount,
            request.project_id.clone(),
        ) {
            Ok(id) => id,
            Err(err) => {
                self.metrics.rejected.inc();
                return Err(err);
            }
        };

        let selected = match self
            .router
            .select_by_latency(request.max_latency_ms, &candidates)
        {
            Ok(candidate) => candidate,
            Err(err) => {
                self.ledger.release(reservation_id)?;
                self.metrics.rejected.inc();
                return Err(err);
            }
        };

        self.metrics.admitted.inc();
        self.metrics.in_flight.inc();
        Ok(Admission::Proceed(Ticket {
            request_id: Uuid::new_v4(),
            user_id: request.user_id,
            reservation_id,
            selected,
            reserved_amount: reserve_amount,
            admitted_at: Instant::now(),
        }))
    }

    /// Provider call succeeded: confirm the spend, record the sample,
    /// store the response under the serving model's scope.
    pub async fn complete(
        &self,
        ticket: Ticket,
        request: &InferenceRequest,
        response: &str,
        actual_cost: Decimal,
        provider_latency: Duration,
    ) -> Result<()> {
        self.ledger.confirm(ticket.reservation_id, actual_cost)?;
        self.router.track_latency(
            &ticket.selected.key,
            provider_latency.as_millis() as u64,
            true,
        );

        let scope = CacheScope::new(ticket.user_id, ticket.selected.key);
        self.cache
            .store(&request.prompt, response, &scope, &request.cache)
            .await;

        self.metrics.completed.inc();
        self.metrics.in_flight.dec();
        Ok(())
    }

    /// Provider call failed: release the hold. A failure sample is
    /// recorded only when the call genuinely started.
    pub fn fail(
        &self,
        ticket: Ticket,
        provider_started: bool,
        provider_latency: Option<Duration>,
    ) -> Result<()> {
        self.ledger.release(ticket.reservation_id)?;
        if provider_started {
            let duration_ms = provider_latency.map_or(0, |d| d.as_millis() as u64);
            self.router
                .track_latency(&ticket.selected.key, duration_ms, false);
        }
        self.metrics.failed.inc();
        self.metrics.in_flight.dec();
        Ok(())
    }

    /// Abandoned upstream (client disconnect, deadline): release the
    /// hold, record nothing.
    pub fn abandon(&self, ticket: Ticket) -> Result<()> {
        self.ledger.release(ticket.reservation_id)?;
        self.metrics.abandoned.inc();
        self.metrics.in_flight.dec();
        Ok(())
    }

    /// Pops the highest-priority parked request once capacity frees up;
    /// the caller re-runs it through `admit`.
    pub fn next_queued(&self) -> Option<QueuedRequest<InferenceRequest>> {
        self.queue.dequeue_highest()
    }

    pub fn router(&self) -> &LatencyRouter {
        &self.router
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn queue(&self) -> &PriorityQueue<InferenceRequest> {
        &self.queue
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }
}
