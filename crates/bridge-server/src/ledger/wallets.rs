//! Wallet directory: lazily created wallets per owner and currency.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LedgerError;
use crate::models::{LedgerEntry, Wallet, WalletOwner};
use crate::store::UnitOfWork;

/// Entries returned with a wallet summary.
pub const RECENT_ENTRY_LIMIT: i64 = 20;

/// A wallet with its spendable balance and latest movements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    pub wallet: Wallet,
    pub available: BigDecimal,
    pub recent_entries: Vec<LedgerEntry>,
}

async fn get_or_create(
    uow: &mut dyn UnitOfWork,
    owner: WalletOwner,
    currency: &str,
) -> Result<Wallet, LedgerError> {
    if let Some(wallet) = uow.find_wallet(&owner, currency).await? {
        return Ok(wallet);
    }
    let wallet = uow.insert_wallet(owner.to_new_wallet(currency)).await?;
    tracing::info!(
        wallet_id = %wallet.id,
        kind = ?wallet.kind,
        currency = %wallet.currency,
        "Wallet created"
    );
    Ok(wallet)
}

/// Wallet of `user_id` in `currency`, created with zero balance if absent.
pub async fn get_or_create_wallet(
    uow: &mut dyn UnitOfWork,
    user_id: Uuid,
    currency: &str,
) -> Result<Wallet, LedgerError> {
    get_or_create(uow, WalletOwner::User(user_id), currency).await
}

/// System wallet holding funds in trust for one order.
pub async fn get_or_create_escrow_wallet(
    uow: &mut dyn UnitOfWork,
    order_id: Uuid,
    currency: &str,
) -> Result<Wallet, LedgerError> {
    get_or_create(uow, WalletOwner::Escrow(order_id), currency).await
}

/// System wallet collecting fee revenue.
pub async fn get_or_create_platform_wallet(
    uow: &mut dyn UnitOfWork,
    currency: &str,
) -> Result<Wallet, LedgerError> {
    get_or_create(uow, WalletOwner::Platform, currency).await
}

/// System wallet on the other side of external top-ups.
pub async fn get_or_create_settlement_wallet(
    uow: &mut dyn UnitOfWork,
    currency: &str,
) -> Result<Wallet, LedgerError> {
    get_or_create(uow, WalletOwner::Settlement, currency).await
}

/// Summary of a user's wallet, creating it on first access.
pub async fn wallet_summary(
    uow: &mut dyn UnitOfWork,
    user_id: Uuid,
    currency: &str,
) -> Result<WalletSummary, LedgerError> {
    let wallet = get_or_create_wallet(uow, user_id, currency).await?;
    let recent_entries = uow.recent_ledger_entries(wallet.id, RECENT_ENTRY_LIMIT).await?;
    Ok(WalletSummary {
        available: wallet.available(),
        wallet,
        recent_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WalletKind;
    use crate::store::{LedgerStore, MemoryStore};

    #[tokio::test]
    async fn test_wallet_created_once_per_currency() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let mut uow = store.begin().await.unwrap();

        let first = get_or_create_wallet(uow.as_mut(), user_id, "KES").await.unwrap();
        let again = get_or_create_wallet(uow.as_mut(), user_id, "KES").await.unwrap();
        let ugx = get_or_create_wallet(uow.as_mut(), user_id, "UGX").await.unwrap();

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, ugx.id);
        assert_eq!(first.kind, WalletKind::User);
        assert_eq!(first.balance, bigdecimal::BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_escrow_wallets_are_per_order() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();

        let a = get_or_create_escrow_wallet(uow.as_mut(), Uuid::new_v4(), "KES")
            .await
            .unwrap();
        let b = get_or_create_escrow_wallet(uow.as_mut(), Uuid::new_v4(), "KES")
            .await
            .unwrap();

        assert_ne!(a.id, b.id);
        assert!(a.is_system());
    }

    #[tokio::test]
    async fn test_platform_wallet_is_shared() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();

        let a = get_or_create_platform_wallet(uow.as_mut(), "KES").await.unwrap();
        let b = get_or_create_platform_wallet(uow.as_mut(), "KES").await.unwrap();
        let settlement = get_or_create_settlement_wallet(uow.as_mut(), "KES")
            .await
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, settlement.id);
    }
}
