//! Monetary budget ledger: estimate, then reserve -> confirm | release.
//!
//! Amounts are [`rust_decimal::Decimal`] end to end, so many small
//! reservations never accumulate floating-point drift. Each user's
//! accumulators live behind their own mutex; reservations carry their own
//! entry-level lock in a concurrent map, so operations on different users
//! or reservations never contend.

mod pricing;
mod reservation;

pub use pricing::{PricingSnapshot, PricingSource, StaticPricingBuilder, StaticPricingSource};
pub use reservation::{BudgetReservation, ReservationStatus};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pricing::PricingCache;

use crate::types::{ModelKey, TokenUsage};
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// How long a pricing snapshot is served before refreshing through the
    /// source.
    pub pricing_max_age: Duration,
    /// Ceiling applied to users without an explicit one. `None` means
    /// unlimited; the ledger itself only ever enforces positive amounts.
    pub default_ceiling: Option<Decimal>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            pricing_max_age: Duration::from_secs(300),
            default_ceiling: None,
        }
    }
}

#[derive(Debug, Default)]
struct AccountState {
    reserved_total: Decimal,
    realized_spend_total: Decimal,
    ceiling: Option<Decimal>,
}

/// Point-in-time view of one user's account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub user_id: String,
    pub reserved_total: Decimal,
    pub realized_spend_total: Decimal,
    pub ceiling: Option<Decimal>,
}

pub struct BudgetLedger {
    config: LedgerConfig,
    pricing: PricingCache,
    accounts: DashMap<String, Arc<Mutex<AccountState>>>,
    reservations: DashMap<Uuid, BudgetReservation>,
}

impl BudgetLedger {
    pub fn new(config: LedgerConfig, pricing_source: Arc<dyn PricingSource>) -> Self {
        let pricing = PricingCache::new(pricing_source, config.pricing_max_age);
        Self {
            config,
            pricing,
            accounts: DashMap::new(),
            reservations: DashMap::new(),
        }
    }

    /// Token estimate to money, against the latest cached snapshot.
    /// Deterministic for identical inputs while the snapshot is unchanged.
    pub async fn estimate_cost(&self, key: &ModelKey, usage: &TokenUsage) -> Result<Decimal> {
        let snapshot = self.pricing.get(key).await?;
        Ok(snapshot.cost_for(usage))
    }

    /// Creates an `Active` reservation and bumps the user's reserved
    /// accumulator. Rejects non-positive amounts and ceiling breaches
    /// before any state changes.
    pub fn reserve(
        &self,
        user_id: &str,
        amount: Decimal,
        project_id: Option<String>,
    ) -> Result<Uuid> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount { amount });
        }

        let account = self.account(user_id);
        let mut state = account.lock().unwrap_or_else(|e| e.into_inner());

        let ceiling = state.ceiling.or(self.config.default_ceiling);
        if let Some(ceiling) = ceiling {
            let committed = state.reserved_total + state.realized_spend_total;
            if committed + amount > ceiling {
                return Err(Error::BudgetExceeded {
                    user_id: user_id.to_string(),
                    requested: amount,
                    committed,
                    ceiling,
                });
            }
        }

        let reservation = BudgetReservation::new(user_id, amount, project_id);
        let id = reservation.id;
        state.reserved_total += amount;
        drop(state);

        self.reservations.insert(id, reservation);
        tracing::debug!(user_id, reservation = %id, %amount, "budget reserved");
        Ok(id)
    }

    /// Active -> Confirmed: the reserved accumulator drops by the
    /// *originally reserved* amount and `actual_amount` is recorded as
    /// realized spend.
    pub fn confirm(&self, reservation_id: Uuid, actual_amount: Decimal) -> Result<()> {
        if actual_amount < Decimal::ZERO {
            return Err(Error::InvalidAmount {
                amount: actual_amount,
            });
        }

        let (user_id, reserved) =
            self.finish_reservation(reservation_id, ReservationStatus::Confirmed)?;

        let account = self.account(&user_id);
        let mut state = account.lock().unwrap_or_else(|e| e.into_inner());
        state.reserved_total -= reserved;
        state.realized_spend_total += actual_amount;

        tracing::debug!(
            user_id,
            reservation = %reservation_id,
            %reserved,
            %actual_amount,
            "budget confirmed"
        );
        Ok(())
    }

    /// Active -> Released: the hold is returned in full. Used on request
    /// failure or cancellation.
    pub fn release(&self, reservation_id: Uuid) -> Result<()> {
        let (user_id, reserved) =
            self.finish_reservation(reservation_id, ReservationStatus::Released)?;

        let account = self.account(&user_id);
        let mut state = account.lock().unwrap_or_else(|e| e.into_inner());
        state.reserved_total -= reserved;

        tracing::debug!(user_id, reservation = %reservation_id, %reserved, "budget released");
        Ok(())
    }

    /// Live sum of the user's active reservations.
    pub fn reserved_budget(&self, user_id: &str) -> Decimal {
        self.read_account(user_id, |state| state.reserved_total)
    }

    /// Total confirmed spend for the user.
    pub fn realized_spend(&self, user_id: &str) -> Decimal {
        self.read_account(user_id, |state| state.realized_spend_total)
    }

    pub fn set_ceiling(&self, user_id: &str, ceiling: Option<Decimal>) {
        let account = self.account(user_id);
        let mut state = account.lock().unwrap_or_else(|e| e.into_inner());
        state.ceiling = ceiling;
    }

    pub fn account_summary(&self, user_id: &str) -> AccountSummary {
        let account = self.account(user_id);
        let state = account.lock().unwrap_or_else(|e| e.into_inner());
        AccountSummary {
            user_id: user_id.to_string(),
            reserved_total: state.reserved_total,
            realized_spend_total: state.realized_spend_total,
            ceiling: state.ceiling,
        }
    }

    pub fn summaries(&self) -> Vec<AccountSummary> {
        self.accounts
            .iter()
            .map(|slot| {
                let state = slot.value().lock().unwrap_or_else(|e| e.into_inner());
                AccountSummary {
                    user_id: slot.key().clone(),
                    reserved_total: state.reserved_total,
                    realized_spend_total: state.realized_spend_total,
                    ceiling: state.ceiling,
                }
            })
            .collect()
    }

    pub fn reservation(&self, reservation_id: Uuid) -> Option<BudgetReservation> {
        self.reservations
            .get(&reservation_id)
            .map(|slot| slot.clone())
    }

    pub fn active_reservations(&self, user_id: &str) -> Vec<BudgetReservation> {
        self.reservations
            .iter()
            .filter(|slot| {
                slot.user_id == user_id && slot.status == ReservationStatus::Active
            })
            .map(|slot| slot.clone())
            .collect()
    }

    /// Flips the reservation to its terminal status under the map's
    /// entry lock, so exactly one of two racing terminal calls wins.
    /// Returns the owning user and the reserved amount.
    fn finish_reservation(
        &self,
        reservation_id: Uuid,
        terminal: ReservationStatus,
    ) -> Result<(String, Decimal)> {
        let mut slot = self
            .reservations
            .get_mut(&reservation_id)
            .ok_or(Error::UnknownReservation(reservation_id))?;

        if slot.status != ReservationStatus::Active {
            return Err(Error::InvalidReservationState {
                id: reservation_id,
                status: slot.status,
            });
        }

        slot.status = terminal;
        Ok((slot.user_id.clone(), slot.amount))
    }

    fn account(&self, user_id: &str) -> Arc<Mutex<AccountState>> {
        self.accounts
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    fn read_account<T: Default>(&self, user_id: &str, f: impl FnOnce(&AccountState) -> T) -> T {
        self.accounts
            .get(user_id)
            .map(|slot| {
                let state = slot.lock().unwrap_or_else(|e| e.into_inner());
                f(&state)
            })
            .unwrap_or_default()
    }
}
