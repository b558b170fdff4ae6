//! Orders, direct payment and wallet top-ups.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::fees::{self, AppliedFeesResult, ApplyFeesRequest};
use super::posting::{self, Transfer};
use super::{wallets, LedgerError, LedgerSettings};
use crate::authz::Actor;
use crate::models::{FeeCategory, FeePayer, NewOrder, Order, OrderStatus, PaymentMode};
use crate::store::UnitOfWork;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Defaults to the caller; only admins may order on someone's behalf.
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub merchant_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_mode: PaymentMode,
}

/// Result of a direct payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub amount: BigDecimal,
    pub currency: String,
    pub fees: AppliedFeesResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    /// Defaults to the caller.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    /// Rail the funds arrived on, e.g. `MPESA`; selects top-up fees.
    #[serde(default)]
    pub funding_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositOutcome {
    pub deposit_id: Uuid,
    pub wallet_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub balance: BigDecimal,
    pub fees: AppliedFeesResult,
}

pub async fn create_order(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    request: CreateOrderRequest,
    settings: &LedgerSettings,
) -> Result<Order, LedgerError> {
    let customer_id = request.customer_id.unwrap_or(actor.user_id);
    actor.require_self_or_admin(customer_id)?;

    if request.merchant_id == customer_id {
        return Err(LedgerError::validation(
            "merchantId",
            "customer and merchant must differ",
        ));
    }
    posting::validate_amount("amount", &request.amount)?;
    settings.validate_currency(&request.currency)?;

    let order = uow
        .insert_order(NewOrder {
            customer_id,
            merchant_id: request.merchant_id,
            amount: request.amount,
            currency: request.currency,
            payment_mode: request.payment_mode,
        })
        .await?;

    tracing::info!(
        order_id = %order.id,
        customer_id = %order.customer_id,
        merchant_id = %order.merchant_id,
        amount = %order.amount,
        currency = %order.currency,
        payment_mode = ?order.payment_mode,
        "Order created"
    );
    Ok(order)
}

/// Locks and returns the order.
pub async fn load_order(uow: &mut dyn UnitOfWork, order_id: Uuid) -> Result<Order, LedgerError> {
    uow.order_for_update(order_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("order {}", order_id)))
}

pub async fn get_order(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    order_id: Uuid,
) -> Result<Order, LedgerError> {
    let order = load_order(uow, order_id).await?;
    actor.require_party_to(&order)?;
    Ok(order)
}

/// Pays a DIRECT order from the customer's wallet straight to the merchant.
pub async fn pay_now(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    order_id: Uuid,
) -> Result<PaymentOutcome, LedgerError> {
    let order = load_order(uow, order_id).await?;
    actor.require_customer_of(&order)?;

    if order.payment_mode != PaymentMode::Direct {
        return Err(LedgerError::validation(
            "paymentMode",
            format!("order {} is not a DIRECT order", order.id),
        ));
    }
    if order.status != OrderStatus::Pending {
        return Err(LedgerError::InvalidState(format!(
            "order {} is {:?}, expected PENDING",
            order.id, order.status
        )));
    }

    let customer = wallets::get_or_create_wallet(uow, order.customer_id, &order.currency).await?;
    let merchant = wallets::get_or_create_wallet(uow, order.merchant_id, &order.currency).await?;

    let fee_request = ApplyFeesRequest::new(
        FeeCategory::MerchantPayment,
        order.id.to_string(),
        order.amount.clone(),
        &order.currency,
    )
    .merchant(order.merchant_id)
    .customer_wallet(customer.id)
    .merchant_wallet(merchant.id);

    let quote = fees::calculate_fees(uow, &fee_request.query()).await?;
    let required = &order.amount + quote.total_for(FeePayer::Customer);
    posting::ensure_funds(uow, customer.id, &required).await?;

    posting::transfer(
        uow,
        Transfer {
            from_wallet: customer.id,
            to_wallet: merchant.id,
            amount: order.amount.clone(),
            currency: order.currency.clone(),
            debit_reference: format!("ord-{}-cust-debit", order.id),
            credit_reference: format!("ord-{}-mrc-credit", order.id),
            narration: "Order payment".to_string(),
            metadata: json!({ "orderId": order.id }),
        },
    )
    .await?;

    let order = uow.set_order_status(order.id, OrderStatus::Completed).await?;
    let fees = fees::apply_fees(uow, &fee_request).await?;

    tracing::info!(
        order_id = %order.id,
        amount = %order.amount,
        fees = %fees.total,
        "Order paid"
    );
    Ok(PaymentOutcome {
        order_id: order.id,
        status: order.status,
        amount: order.amount,
        currency: order.currency,
        fees,
    })
}

/// Credits a user wallet with funds received from an external rail.
///
/// Only admins record deposits, on confirmation from the rail. The
/// settlement wallet carries the offsetting debit.
pub async fn deposit(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    request: DepositRequest,
    settings: &LedgerSettings,
) -> Result<DepositOutcome, LedgerError> {
    actor.require_admin()?;
    let user_id = request.user_id.unwrap_or(actor.user_id);
    posting::validate_amount("amount", &request.amount)?;
    settings.validate_currency(&request.currency)?;

    let deposit_id = Uuid::new_v4();
    let settlement = wallets::get_or_create_settlement_wallet(uow, &request.currency).await?;
    let wallet = wallets::get_or_create_wallet(uow, user_id, &request.currency).await?;

    posting::transfer(
        uow,
        Transfer {
            from_wallet: settlement.id,
            to_wallet: wallet.id,
            amount: request.amount.clone(),
            currency: request.currency.clone(),
            debit_reference: format!("topup-{}-settle", deposit_id),
            credit_reference: format!("topup-{}-user", deposit_id),
            narration: "Wallet top-up".to_string(),
            metadata: json!({
                "depositId": deposit_id,
                "fundingSource": request.funding_source,
            }),
        },
    )
    .await?;

    let fee_request = ApplyFeesRequest::new(
        FeeCategory::Topup,
        deposit_id.to_string(),
        request.amount.clone(),
        &request.currency,
    )
    .funding_plan(request.funding_source.clone())
    .customer_wallet(wallet.id);
    let fees = fees::apply_fees(uow, &fee_request).await?;

    let wallet = uow
        .wallet_for_update(wallet.id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", wallet.id)))?;

    tracing::info!(
        wallet_id = %wallet.id,
        amount = %request.amount,
        currency = %request.currency,
        funding_source = ?request.funding_source,
        "Wallet topped up"
    );
    Ok(DepositOutcome {
        deposit_id,
        wallet_id: wallet.id,
        amount: request.amount,
        currency: request.currency,
        balance: wallet.balance,
        fees,
    })
}
