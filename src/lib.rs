//! # infergate
//!
//! The decision core of an LLM inference gateway: for every inbound
//! request it decides whether the request may proceed, which
//! provider/model serves it, how it is ordered relative to other pending
//! requests, and whether it can be answered from a cache instead of
//! invoking a provider at all.
//!
//! Four independently-testable components, composed by a thin
//! [`Dispatcher`]:
//!
//! - [`LatencyRouter`]: rolling per-(provider, model) latency/error
//!   statistics, a per-model circuit breaker, and latency-aware selection.
//! - [`BudgetLedger`]: cost estimation plus an atomic
//!   reserve -> confirm | release lifecycle, so concurrent requests never
//!   double-spend a budget.
//! - [`ResponseCache`]: exact-match and semantic-similarity lookup of
//!   prior responses, scoped per user/provider/model.
//! - [`PriorityQueue`]: priority-ordered holding queue used when the
//!   system is over capacity.
//!
//! This is a library boundary, not a network service: no wire protocol,
//! no provider transport. External collaborators (pricing feed, embedding
//! provider) plug in through the [`PricingSource`] and
//! [`EmbeddingProvider`] traits.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use infergate::{
//!     Admission, CacheOptions, Dispatcher, GatewayConfig, HashEmbedder, InferenceRequest,
//!     ModelKey, StaticPricingSource, TokenUsage, UserTier,
//! };
//! use rust_decimal_macros::dec;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), infergate::Error> {
//!     let pricing = StaticPricingSource::builder()
//!         .model(ModelKey::new("openai", "gpt-4"), dec!(0.00003), dec!(0.00006))
//!         .build();
//!     let dispatcher = Dispatcher::new(
//!         GatewayConfig::default(),
//!         Arc::new(pricing),
//!         Some(Arc::new(HashEmbedder::default())),
//!     );
//!
//!     let admission = dispatcher
//!         .admit(InferenceRequest {
//!             user_id: "user-1".into(),
//!             project_id: None,
//!             tier: UserTier::Pro,
//!             prompt: "What is the capital of France?".into(),
//!             candidates: vec![ModelKey::new("openai", "gpt-4")],
//!             max_latency_ms: 1000,
//!             expected_usage: TokenUsage::new(1000, 500),
//!             cache: CacheOptions::new(),
//!         })
//!         .await?;
//!
//!     match admission {
//!         Admission::Cached(hit) => println!("cache: {}", hit.value),
//!         Admission::Proceed(ticket) => println!("route to {}", ticket.selected.key),
//!         Admission::Queued { request_id, .. } => println!("queued as {request_id}"),
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod cache;
pub mod dispatch;
pub mod ledger;
pub mod metrics;
pub mod queue;
pub mod router;
pub mod types;

// Re-exports for convenience
pub use cache::{
    CacheConfig, CacheFilter, CacheHit, CacheOptions, CacheScope, CacheStats, CacheStrategy,
    EmbeddingProvider, EmbeddingRetry, ExponentialBackoff, HashEmbedder, ResponseCache,
    cosine_similarity, normalize_prompt, prompt_hash,
};
pub use dispatch::{Admission, Dispatcher, GatewayConfig, InferenceRequest, Ticket};
pub use ledger::{
    AccountSummary, BudgetLedger, BudgetReservation, LedgerConfig, PricingSnapshot, PricingSource,
    ReservationStatus, StaticPricingBuilder, StaticPricingSource,
};
pub use metrics::{Counter, Gauge, GatewayMetrics, MetricsSummary};
pub use queue::{MAX_PRIORITY, PriorityQueue, QueueConfig, QueueStats, QueuedRequest};
pub use router::{
    CircuitConfig, CircuitState, LatencyRouter, LatencySample, LatencyStats, RouteCandidate,
    RouterConfig, WindowConfig,
};
pub use types::{ModelKey, TokenUsage, UserTier};

use rust_decimal::Decimal;
use uuid::Uuid;

/// Error type for gateway-core operations.
///
/// Dependency failures with a safe degraded path (embeddings, latency
/// fallback) never surface here; the variants below are the hard failures
/// with no safe default.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No current pricing snapshot for the requested model; the estimate
    /// cannot proceed.
    #[error("no pricing available for {key}")]
    PricingUnavailable { key: ModelKey },

    /// Reservation would breach the configured ceiling; nothing was
    /// created.
    #[error(
        "budget exceeded for {user_id}: requested ${requested}, \
         ${committed} already committed (ceiling ${ceiling})"
    )]
    BudgetExceeded {
        user_id: String,
        requested: Decimal,
        committed: Decimal,
        ceiling: Decimal,
    },

    /// Confirm/release called on a reservation that already reached a
    /// terminal status. Signals a ledger-invariant violation upstream;
    /// never ignored.
    #[error("reservation {id} is {status:?}, expected active")]
    InvalidReservationState { id: Uuid, status: ReservationStatus },

    /// Confirm/release called with an id the ledger has never issued.
    #[error("reservation {0} not found")]
    UnknownReservation(Uuid),

    /// Every candidate is circuit-open, or the candidate list is empty.
    /// The caller decides whether to queue, degrade, or reject.
    #[error("no candidate model is available")]
    NoAvailableModel,

    /// Embedding generation failed after bounded retries. Internal to the
    /// cache, which degrades to exact-only matching rather than failing
    /// the request.
    #[error("embedding generation failed: {0}")]
    EmbeddingUnavailable(String),

    /// Monetary amount outside the accepted range.
    #[error("invalid amount {amount}: must be positive")]
    InvalidAmount { amount: Decimal },
}

impl Error {
    /// True for transient dependency errors worth retrying upstream.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::EmbeddingUnavailable(_))
    }

    /// True when the error signals a broken reserve/confirm/release
    /// sequence rather than a policy refusal.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidReservationState { .. } | Error::UnknownReservation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PricingUnavailable {
            key: ModelKey::new("openai", "gpt-4"),
        };
        assert!(err.to_string().contains("openai/gpt-4"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::EmbeddingUnavailable("timeout".into()).is_retryable());
        assert!(!Error::NoAvailableModel.is_retryable());

        let invariant = Error::InvalidReservationState {
            id: Uuid::new_v4(),
            status: ReservationStatus::Confirmed,
        };
        assert!(invariant.is_invariant_violation());
        assert!(Error::UnknownReservation(Uuid::new_v4()).is_invariant_violation());
        assert!(!Error::NoAvailableModel.is_invariant_violation());
    }
}
