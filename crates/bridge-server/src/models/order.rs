//! Shopping order model.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// How the customer settles the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_mode", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    /// Paid in full, straight to the merchant.
    Direct,
    /// Paid into escrow and released to the merchant later.
    Escrow,
    /// Paid through an installment plan.
    Installment,
}

/// Lifecycle of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created at checkout, nothing paid yet.
    Pending,
    /// Funds are held in the order's escrow wallet.
    InEscrow,
    /// Merchant has been paid.
    Completed,
    /// Funds (if any) went back to the customer.
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// A shopping transaction between a customer and a merchant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    /// Unique identifier for this order.
    pub id: Uuid,
    /// User paying for the order.
    pub customer_id: Uuid,
    /// User receiving the funds.
    pub merchant_id: Uuid,
    /// Order total.
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_mode: PaymentMode,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub merchant_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_mode: PaymentMode,
}

impl Order {
    /// Check if the user is a party (customer or merchant) to this order.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.customer_id == user_id || self.merchant_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_order_status_serialization() {
        assert_eq!(serde_json::to_string(&OrderStatus::Pending).unwrap(), "\"PENDING\"");
        assert_eq!(serde_json::to_string(&OrderStatus::InEscrow).unwrap(), "\"IN_ESCROW\"");
        assert_eq!(
            serde_json::from_str::<OrderStatus>("\"CANCELLED\"").unwrap(),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn test_payment_mode_serialization() {
        assert_eq!(serde_json::to_string(&PaymentMode::Escrow).unwrap(), "\"ESCROW\"");
        assert_eq!(
            serde_json::from_str::<PaymentMode>("\"INSTALLMENT\"").unwrap(),
            PaymentMode::Installment
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::InEscrow.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_order_involves() {
        let order = Order {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("500.00").unwrap(),
            currency: "KES".to_string(),
            payment_mode: PaymentMode::Direct,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(order.involves(order.customer_id));
        assert!(order.involves(order.merchant_id));
        assert!(!order.involves(Uuid::new_v4()));
    }
}
