//! Wallet model: one balance per (owner, currency).

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Who a wallet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    /// Customer or merchant wallet owned by a user.
    User,
    /// System wallet holding funds in trust for a single order.
    Escrow,
    /// System wallet collecting platform fee revenue.
    Platform,
    /// System wallet mirroring external funding rails (top-ups).
    Settlement,
}

/// A wallet and its running balance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    /// Unique identifier for this wallet.
    pub id: Uuid,
    /// Ownership class of the wallet.
    pub kind: WalletKind,
    /// Owning user (user wallets only).
    pub user_id: Option<Uuid>,
    /// Order the wallet is scoped to (escrow wallets only).
    pub order_id: Option<Uuid>,
    /// ISO currency code, e.g. `KES`.
    pub currency: String,
    /// Sum of all posted ledger entries for this wallet.
    pub balance: BigDecimal,
    /// Funds earmarked but not yet released.
    pub hold: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWallet {
    pub kind: WalletKind,
    pub user_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub currency: String,
}

impl Wallet {
    /// System wallets may be debited below zero; user wallets may not.
    pub fn is_system(&self) -> bool {
        self.kind != WalletKind::User
    }

    /// Balance not earmarked by a hold.
    pub fn available(&self) -> BigDecimal {
        &self.balance - &self.hold
    }

    /// Returns true if the available balance covers `amount`.
    pub fn has_sufficient_balance(&self, amount: &BigDecimal) -> bool {
        &self.available() >= amount
    }
}

impl NewWallet {
    pub fn user(user_id: Uuid, currency: &str) -> Self {
        Self {
            kind: WalletKind::User,
            user_id: Some(user_id),
            order_id: None,
            currency: currency.to_string(),
        }
    }

    pub fn escrow(order_id: Uuid, currency: &str) -> Self {
        Self {
            kind: WalletKind::Escrow,
            user_id: None,
            order_id: Some(order_id),
            currency: currency.to_string(),
        }
    }

    pub fn platform(currency: &str) -> Self {
        Self {
            kind: WalletKind::Platform,
            user_id: None,
            order_id: None,
            currency: currency.to_string(),
        }
    }

    pub fn settlement(currency: &str) -> Self {
        Self {
            kind: WalletKind::Settlement,
            user_id: None,
            order_id: None,
            currency: currency.to_string(),
        }
    }
}

/// Lookup key for the wallet directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WalletOwner {
    User(Uuid),
    Escrow(Uuid),
    Platform,
    Settlement,
}

impl WalletOwner {
    pub fn to_new_wallet(&self, currency: &str) -> NewWallet {
        match self {
            WalletOwner::User(user_id) => NewWallet::user(*user_id, currency),
            WalletOwner::Escrow(order_id) => NewWallet::escrow(*order_id, currency),
            WalletOwner::Platform => NewWallet::platform(currency),
            WalletOwner::Settlement => NewWallet::settlement(currency),
        }
    }

    /// Returns true if `wallet` is the wallet this key refers to (ignoring currency).
    pub fn matches(&self, wallet: &Wallet) -> bool {
        match self {
            WalletOwner::User(user_id) => {
                wallet.kind == WalletKind::User && wallet.user_id == Some(*user_id)
            }
            WalletOwner::Escrow(order_id) => {
                wallet.kind == WalletKind::Escrow && wallet.order_id == Some(*order_id)
            }
            WalletOwner::Platform => wallet.kind == WalletKind::Platform,
            WalletOwner::Settlement => wallet.kind == WalletKind::Settlement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn wallet(kind: WalletKind, balance: &str, hold: &str) -> Wallet {
        Wallet {
            id: Uuid::new_v4(),
            kind,
            user_id: None,
            order_id: None,
            currency: "KES".to_string(),
            balance: BigDecimal::from_str(balance).unwrap(),
            hold: BigDecimal::from_str(hold).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_excludes_hold() {
        let w = wallet(WalletKind::User, "100.00", "30.00");
        assert_eq!(w.available(), BigDecimal::from_str("70.00").unwrap());
        assert!(w.has_sufficient_balance(&BigDecimal::from_str("70.00").unwrap()));
        assert!(!w.has_sufficient_balance(&BigDecimal::from_str("70.01").unwrap()));
    }

    #[test]
    fn test_system_wallets() {
        assert!(!wallet(WalletKind::User, "0", "0").is_system());
        assert!(wallet(WalletKind::Escrow, "0", "0").is_system());
        assert!(wallet(WalletKind::Platform, "0", "0").is_system());
        assert!(wallet(WalletKind::Settlement, "0", "0").is_system());
    }

    #[test]
    fn test_owner_matches() {
        let order_id = Uuid::new_v4();
        let mut w = wallet(WalletKind::Escrow, "0", "0");
        w.order_id = Some(order_id);

        assert!(WalletOwner::Escrow(order_id).matches(&w));
        assert!(!WalletOwner::Escrow(Uuid::new_v4()).matches(&w));
        assert!(!WalletOwner::Platform.matches(&w));
    }

    #[test]
    fn test_wallet_kind_serialization() {
        assert_eq!(serde_json::to_string(&WalletKind::Escrow).unwrap(), "\"escrow\"");
        assert_eq!(
            serde_json::from_str::<WalletKind>("\"settlement\"").unwrap(),
            WalletKind::Settlement
        );
    }
}
