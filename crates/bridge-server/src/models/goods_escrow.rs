//! Goods escrow model: funds held for an order between customer and merchant.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// `held` moves to exactly one of `released` or `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "escrow_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    /// Customer funds sit in the order's escrow wallet.
    Held,
    /// Paid out to the merchant.
    Released,
    /// Returned to the customer, by cancel or refund.
    Cancelled,
}

/// Represents the escrow for a single order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GoodsEscrow {
    /// Unique identifier for this escrow.
    pub id: Uuid,
    /// Order this escrow belongs to (one-to-one).
    pub order_id: Uuid,
    /// Amount currently held.
    pub hold_amount: BigDecimal,
    pub currency: String,
    /// Per-order system wallet holding the funds.
    pub escrow_wallet_id: Uuid,
    /// Free-form condition agreed at funding time.
    pub release_condition: String,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    /// Set once the escrow leaves `held`.
    pub settled_at: Option<DateTime<Utc>>,
}

/// Data required to open a goods escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGoodsEscrow {
    pub order_id: Uuid,
    pub hold_amount: BigDecimal,
    pub currency: String,
    pub escrow_wallet_id: Uuid,
    pub release_condition: String,
}

impl GoodsEscrow {
    /// Only a held escrow can grow, release or be returned.
    pub fn is_held(&self) -> bool {
        matches!(self.status, EscrowStatus::Held)
    }

    pub fn is_released(&self) -> bool {
        matches!(self.status, EscrowStatus::Released)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, EscrowStatus::Cancelled)
    }
}

impl NewGoodsEscrow {
    pub fn new(
        order_id: Uuid,
        hold_amount: BigDecimal,
        currency: &str,
        escrow_wallet_id: Uuid,
        release_condition: String,
    ) -> Self {
        Self {
            order_id,
            hold_amount,
            currency: currency.to_string(),
            escrow_wallet_id,
            release_condition,
        }
    }
}
