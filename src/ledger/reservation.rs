//! Reservation records and their lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Confirmed,
    Released,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// A provisional hold against a user's budget. Created `Active`; exactly
/// one terminal transition (confirm or release) is valid, after which the
/// record is never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetReservation {
    pub id: Uuid,
    pub user_id: String,
    pub project_id: Option<String>,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub status: ReservationStatus,
}

impl BudgetReservation {
    pub(crate) fn new(
        user_id: impl Into<String>,
        amount: Decimal,
        project_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            project_id,
            amount,
            created_at: Utc::now(),
            status: ReservationStatus::Active,
        }
    }
}
