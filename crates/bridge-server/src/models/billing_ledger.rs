//! Billing ledger model: one row per fee charged on a transaction.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use super::{EntryDirection, FeePayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "billing_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    /// Recorded, but no wallet movement happened yet.
    Pending,
    /// Funds moved to the platform wallet (or the platform bore the fee).
    Posted,
}

/// Represents a fee posted against a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingLedgerEntry {
    pub id: Uuid,
    /// Fee category the transaction was billed under.
    pub transaction_type: String,
    /// Originating transaction; unique together with `fee_code`.
    pub transaction_id: String,
    pub fee_code: String,
    /// Direction relative to platform revenue.
    pub direction: EntryDirection,
    pub amount: BigDecimal,
    pub currency: String,
    pub payer_account: FeePayer,
    pub status: BillingStatus,
    pub reference: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Data required to record a fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBillingLedgerEntry {
    pub transaction_type: String,
    pub transaction_id: String,
    pub fee_code: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub payer_account: FeePayer,
    pub status: BillingStatus,
    pub reference: String,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_status_serialization() {
        assert_eq!(serde_json::to_string(&BillingStatus::Pending).unwrap(), "\"pending\"");
        assert_eq!(
            serde_json::from_str::<BillingStatus>("\"posted\"").unwrap(),
            BillingStatus::Posted
        );
    }
}
