//! Ledger primitive: journal entries and the balance moves they carry.

use bigdecimal::{BigDecimal, Zero};
use serde_json::Value;
use uuid::Uuid;

use super::LedgerError;
use crate::models::{LedgerEntry, NewLedgerEntry, Wallet};
use crate::store::UnitOfWork;

/// Rejects amounts that are not strictly positive or carry more than two
/// decimal places.
pub fn validate_amount(field: &str, amount: &BigDecimal) -> Result<(), LedgerError> {
    if amount <= &BigDecimal::zero() {
        return Err(LedgerError::validation(field, "must be greater than zero"));
    }
    if amount.with_scale(2) != *amount {
        return Err(LedgerError::validation(
            field,
            "must have at most two decimal places",
        ));
    }
    Ok(())
}

/// Appends one entry and moves the wallet balance.
///
/// Does not check sufficiency: a debit may take any wallet negative. Callers
/// debiting user wallets run [`ensure_funds`] first.
pub async fn post_entry(
    uow: &mut dyn UnitOfWork,
    entry: NewLedgerEntry,
) -> Result<LedgerEntry, LedgerError> {
    validate_amount("amount", &entry.amount)?;

    let wallet = uow
        .wallet_for_update(entry.wallet_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", entry.wallet_id)))?;

    if wallet.currency != entry.currency {
        return Err(LedgerError::validation(
            "currency",
            format!(
                "entry currency {} does not match wallet currency {}",
                entry.currency, wallet.currency
            ),
        ));
    }

    let posted = uow.apply_ledger_entry(entry).await?;
    tracing::debug!(
        wallet_id = %posted.wallet_id,
        reference = %posted.reference,
        direction = ?posted.direction,
        amount = %posted.amount,
        balance_after = %posted.balance_after,
        "Ledger entry posted"
    );
    Ok(posted)
}

/// A two-leg movement between wallets of one currency.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub from_wallet: Uuid,
    pub to_wallet: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub debit_reference: String,
    pub credit_reference: String,
    pub narration: String,
    pub metadata: Value,
}

/// Posts the debit leg, then the credit leg.
pub async fn transfer(
    uow: &mut dyn UnitOfWork,
    transfer: Transfer,
) -> Result<(LedgerEntry, LedgerEntry), LedgerError> {
    let Transfer {
        from_wallet,
        to_wallet,
        amount,
        currency,
        debit_reference,
        credit_reference,
        narration,
        metadata,
    } = transfer;

    let debit = NewLedgerEntry::debit(
        from_wallet,
        amount.clone(),
        &currency,
        debit_reference,
        metadata.clone(),
    )
    .with_counterparty(to_wallet)
    .with_narration(narration.clone());
    let credit = NewLedgerEntry::credit(to_wallet, amount, &currency, credit_reference, metadata)
        .with_counterparty(from_wallet)
        .with_narration(narration);

    let debit = post_entry(uow, debit).await?;
    let credit = post_entry(uow, credit).await?;
    Ok((debit, credit))
}

/// Locks the wallet and fails with `InsufficientFunds` when a user wallet
/// cannot cover `amount` from its available balance. System wallets pass.
pub async fn ensure_funds(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    amount: &BigDecimal,
) -> Result<Wallet, LedgerError> {
    let wallet = uow
        .wallet_for_update(wallet_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", wallet_id)))?;

    if !wallet.is_system() && !wallet.has_sufficient_balance(amount) {
        tracing::warn!(
            wallet_id = %wallet.id,
            available = %wallet.available(),
            requested = %amount,
            "Insufficient funds"
        );
        return Err(LedgerError::InsufficientFunds {
            wallet_id: wallet.id,
            available: wallet.available(),
            requested: amount.clone(),
        });
    }
    Ok(wallet)
}

/// Moves the wallet hold by `delta`; a negative delta releases earmarked funds.
pub async fn adjust_hold(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    delta: &BigDecimal,
) -> Result<Wallet, LedgerError> {
    Ok(uow.adjust_hold(wallet_id, delta).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewWallet;
    use crate::store::{LedgerStore, MemoryStore};
    use serde_json::json;
    use std::str::FromStr;

    fn amount(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount("amount", &amount("10.50")).is_ok());
        assert!(validate_amount("amount", &amount("10")).is_ok());
        assert!(validate_amount("amount", &amount("0")).is_err());
        assert!(validate_amount("amount", &amount("-1.00")).is_err());
        assert!(validate_amount("amount", &amount("1.005")).is_err());
    }

    #[tokio::test]
    async fn test_transfer_conserves_value() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let from = uow.insert_wallet(NewWallet::settlement("KES")).await.unwrap();
        let to = uow
            .insert_wallet(NewWallet::user(Uuid::new_v4(), "KES"))
            .await
            .unwrap();

        let (debit, credit) = transfer(
            uow.as_mut(),
            Transfer {
                from_wallet: from.id,
                to_wallet: to.id,
                amount: amount("250.00"),
                currency: "KES".to_string(),
                debit_reference: "t-1-out".to_string(),
                credit_reference: "t-1-in".to_string(),
                narration: "Test".to_string(),
                metadata: json!({}),
            },
        )
        .await
        .unwrap();

        assert_eq!(debit.balance_after, amount("-250.00"));
        assert_eq!(credit.balance_after, amount("250.00"));
        assert_eq!(debit.counterparty_wallet_id, Some(to.id));
        assert_eq!(&debit.balance_after + &credit.balance_after, BigDecimal::zero());
    }

    #[tokio::test]
    async fn test_post_entry_rejects_currency_mismatch() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let wallet = uow.insert_wallet(NewWallet::platform("KES")).await.unwrap();

        let err = post_entry(
            uow.as_mut(),
            NewLedgerEntry::credit(wallet.id, amount("1.00"), "UGX", "x".to_string(), json!({})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { ref field, .. } if field == "currency"));
    }

    #[tokio::test]
    async fn test_ensure_funds_on_user_wallet() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let wallet = uow
            .insert_wallet(NewWallet::user(Uuid::new_v4(), "KES"))
            .await
            .unwrap();

        let err = ensure_funds(uow.as_mut(), wallet.id, &amount("0.01"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let system = uow.insert_wallet(NewWallet::settlement("KES")).await.unwrap();
        assert!(ensure_funds(uow.as_mut(), system.id, &amount("100.00"))
            .await
            .is_ok());
    }
}
