//! Wallet-to-wallet transfers and withdrawals to an external rail.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::fees::{self, AppliedFeesResult, ApplyFeesRequest};
use super::posting::{self, Transfer};
use super::{wallets, LedgerError, LedgerSettings};
use crate::authz::Actor;
use crate::models::{FeeCategory, FeePayer};
use crate::store::UnitOfWork;

const DEFAULT_NARRATION: &str = "P2P transfer";
const MAX_NARRATION_LEN: usize = 500;
const MAX_CLIENT_REF_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub recipient_user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    #[serde(default)]
    pub narration: Option<String>,
    /// Caller-chosen reference; reusing it is a `Conflict`.
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub reference: String,
    pub sender_wallet_id: Uuid,
    pub receiver_wallet_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub sender_balance: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub amount: BigDecimal,
    pub currency: String,
    /// Payout rail, e.g. `MPESA`; selects withdrawal fees scoped to it.
    #[serde(default)]
    pub method: Option<String>,
    /// Phone number or account the payout goes to.
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalOutcome {
    pub withdrawal_id: Uuid,
    pub wallet_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub balance: BigDecimal,
    pub fees: AppliedFeesResult,
}

fn validate_client_ref(client_ref: &str) -> Result<(), LedgerError> {
    if client_ref.trim().is_empty() || client_ref.len() > MAX_CLIENT_REF_LEN {
        return Err(LedgerError::validation(
            "clientRef",
            format!("must be 1 to {} characters", MAX_CLIENT_REF_LEN),
        ));
    }
    Ok(())
}

/// Moves funds from the caller's wallet to another user's wallet.
pub async fn transfer(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    request: TransferRequest,
    settings: &LedgerSettings,
) -> Result<TransferOutcome, LedgerError> {
    posting::validate_amount("amount", &request.amount)?;
    settings.validate_currency(&request.currency)?;
    if request.recipient_user_id == actor.user_id {
        return Err(LedgerError::validation(
            "recipientUserId",
            "cannot transfer to yourself",
        ));
    }
    let narration = request
        .narration
        .unwrap_or_else(|| DEFAULT_NARRATION.to_string());
    if narration.len() > MAX_NARRATION_LEN {
        return Err(LedgerError::validation(
            "narration",
            format!("must be at most {} characters", MAX_NARRATION_LEN),
        ));
    }
    let base = match &request.client_ref {
        Some(client_ref) => {
            validate_client_ref(client_ref)?;
            format!("p2p-{}-{}", actor.user_id, client_ref)
        }
        None => format!("p2p-{}", Uuid::new_v4()),
    };

    let sender = wallets::get_or_create_wallet(uow, actor.user_id, &request.currency).await?;
    let receiver =
        wallets::get_or_create_wallet(uow, request.recipient_user_id, &request.currency).await?;
    posting::ensure_funds(uow, sender.id, &request.amount).await?;

    let (debit, _) = posting::transfer(
        uow,
        Transfer {
            from_wallet: sender.id,
            to_wallet: receiver.id,
            amount: request.amount.clone(),
            currency: request.currency.clone(),
            debit_reference: format!("{}-out", base),
            credit_reference: format!("{}-in", base),
            narration,
            metadata: json!({ "type": "p2p", "recipientUserId": request.recipient_user_id }),
        },
    )
    .await?;

    tracing::info!(
        reference = %base,
        from_wallet = %sender.id,
        to_wallet = %receiver.id,
        amount = %request.amount,
        currency = %request.currency,
        "Wallet transfer posted"
    );
    Ok(TransferOutcome {
        reference: base,
        sender_wallet_id: sender.id,
        receiver_wallet_id: receiver.id,
        amount: request.amount,
        currency: request.currency,
        sender_balance: debit.balance_after,
    })
}

/// Debits the caller's wallet for a payout; the settlement wallet carries
/// the offsetting credit. WITHDRAWAL fees are charged to the caller.
pub async fn withdraw(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    request: WithdrawRequest,
    settings: &LedgerSettings,
) -> Result<WithdrawalOutcome, LedgerError> {
    posting::validate_amount("amount", &request.amount)?;
    settings.validate_currency(&request.currency)?;

    let withdrawal_id = Uuid::new_v4();
    let wallet = wallets::get_or_create_wallet(uow, actor.user_id, &request.currency).await?;
    let settlement = wallets::get_or_create_settlement_wallet(uow, &request.currency).await?;

    let fee_request = ApplyFeesRequest::new(
        FeeCategory::Withdrawal,
        withdrawal_id.to_string(),
        request.amount.clone(),
        &request.currency,
    )
    .funding_plan(request.method.as_ref().map(|m| m.to_ascii_uppercase()))
    .customer_wallet(wallet.id);

    let quote = fees::calculate_fees(uow, &fee_request.query()).await?;
    let required = &request.amount + quote.total_for(FeePayer::Customer);
    posting::ensure_funds(uow, wallet.id, &required).await?;

    posting::transfer(
        uow,
        Transfer {
            from_wallet: wallet.id,
            to_wallet: settlement.id,
            amount: request.amount.clone(),
            currency: request.currency.clone(),
            debit_reference: format!("wd-{}-user", withdrawal_id),
            credit_reference: format!("wd-{}-settle", withdrawal_id),
            narration: "Wallet withdrawal".to_string(),
            metadata: json!({
                "withdrawalId": withdrawal_id,
                "method": request.method,
                "destination": request.destination,
            }),
        },
    )
    .await?;
    let fees = fees::apply_fees(uow, &fee_request).await?;

    let wallet = uow
        .wallet_for_update(wallet.id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", wallet.id)))?;

    tracing::info!(
        withdrawal_id = %withdrawal_id,
        wallet_id = %wallet.id,
        amount = %request.amount,
        fees = %fees.total,
        "Wallet withdrawal posted"
    );
    Ok(WithdrawalOutcome {
        withdrawal_id,
        wallet_id: wallet.id,
        amount: request.amount,
        currency: request.currency,
        balance: wallet.balance,
        fees,
    })
}
