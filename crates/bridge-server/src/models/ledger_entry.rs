//! Wallet ledger model: immutable journal rows behind every balance change.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Direction of a ledger entry relative to its wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "entry_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    /// Decreases the wallet balance.
    Debit,
    /// Increases the wallet balance.
    Credit,
}

/// Represents an immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    /// Unique identifier for this ledger entry.
    pub id: Uuid,
    /// Wallet whose balance this entry moved.
    pub wallet_id: Uuid,
    /// Wallet on the other side of the transfer, if any.
    pub counterparty_wallet_id: Option<Uuid>,
    pub direction: EntryDirection,
    /// Always strictly positive.
    pub amount: BigDecimal,
    pub currency: String,
    /// Caller-supplied reference, unique per logical operation and leg.
    pub reference: String,
    pub narration: Option<String>,
    /// Additional entry metadata (JSONB).
    pub metadata: serde_json::Value,
    /// Wallet balance immediately after this entry was applied.
    pub balance_after: BigDecimal,
    /// When this entry was posted (immutable).
    pub created_at: DateTime<Utc>,
}

/// Data required to post a ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub wallet_id: Uuid,
    pub counterparty_wallet_id: Option<Uuid>,
    pub direction: EntryDirection,
    pub amount: BigDecimal,
    pub currency: String,
    pub reference: String,
    pub narration: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewLedgerEntry {
    /// Create a debit entry.
    pub fn debit(
        wallet_id: Uuid,
        amount: BigDecimal,
        currency: &str,
        reference: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            wallet_id,
            counterparty_wallet_id: None,
            direction: EntryDirection::Debit,
            amount,
            currency: currency.to_string(),
            reference,
            narration: None,
            metadata,
        }
    }

    /// Create a credit entry.
    pub fn credit(
        wallet_id: Uuid,
        amount: BigDecimal,
        currency: &str,
        reference: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            direction: EntryDirection::Credit,
            ..Self::debit(wallet_id, amount, currency, reference, metadata)
        }
    }

    pub fn with_counterparty(mut self, wallet_id: Uuid) -> Self {
        self.counterparty_wallet_id = Some(wallet_id);
        self
    }

    pub fn with_narration(mut self, narration: impl Into<String>) -> Self {
        self.narration = Some(narration.into());
        self
    }

    /// Signed effect of this entry on the wallet balance.
    pub fn signed_amount(&self) -> BigDecimal {
        match self.direction {
            EntryDirection::Credit => self.amount.clone(),
            EntryDirection::Debit => -self.amount.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_direction_serialization() {
        assert_eq!(serde_json::to_string(&EntryDirection::Debit).unwrap(), "\"debit\"");
        assert_eq!(
            serde_json::from_str::<EntryDirection>("\"credit\"").unwrap(),
            EntryDirection::Credit
        );
    }

    #[test]
    fn test_new_debit_and_credit() {
        let wallet_id = Uuid::new_v4();
        let amount = BigDecimal::from_str("250.00").unwrap();

        let debit = NewLedgerEntry::debit(
            wallet_id,
            amount.clone(),
            "KES",
            "ord-1-cust-debit".to_string(),
            json!({"order_id": "1"}),
        );
        assert_eq!(debit.direction, EntryDirection::Debit);
        assert_eq!(debit.signed_amount(), BigDecimal::from_str("-250.00").unwrap());

        let credit = NewLedgerEntry::credit(
            wallet_id,
            amount.clone(),
            "KES",
            "ord-1-mrc-credit".to_string(),
            json!({}),
        )
        .with_narration("Order payment");
        assert_eq!(credit.direction, EntryDirection::Credit);
        assert_eq!(credit.signed_amount(), amount);
        assert_eq!(credit.narration.as_deref(), Some("Order payment"));
        assert!(credit.counterparty_wallet_id.is_none());
    }
}
