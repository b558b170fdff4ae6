//! Escrow state machine for goods orders.
//!
//! ```text
//! order:  PENDING --fund--> IN_ESCROW --release--> COMPLETED
//!                                     --cancel/refund--> CANCELLED
//! escrow:           held --release--> released
//!                        --cancel/refund--> cancelled
//! ```
//!
//! Funds sit in a per-order escrow wallet whose `hold` mirrors the escrow's
//! `hold_amount` while it is held.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::fees::{self, ApplyFeesRequest};
use super::orders::load_order;
use super::posting::{self, Transfer};
use super::{wallets, LedgerError};
use crate::authz::Actor;
use crate::models::{
    EscrowStatus, FeeCategory, FeePayer, GoodsEscrow, NewGoodsEscrow, Order, OrderStatus,
    PaymentMode,
};
use crate::store::UnitOfWork;

/// Result of every escrow verb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowOutcome {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub escrow_status: EscrowStatus,
    pub hold_amount: BigDecimal,
    pub currency: String,
}

impl EscrowOutcome {
    fn new(order: &Order, escrow: &GoodsEscrow) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            escrow_status: escrow.status,
            hold_amount: escrow.hold_amount.clone(),
            currency: escrow.currency.clone(),
        }
    }
}

/// Which caller path returned the funds; only changes ledger references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reversal {
    Cancel,
    Refund,
}

impl Reversal {
    fn as_str(&self) -> &'static str {
        match self {
            Reversal::Cancel => "cancel",
            Reversal::Refund => "refund",
        }
    }
}

/// Moves the order total from the customer into a fresh escrow.
pub async fn fund(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    order_id: Uuid,
    release_condition: &str,
) -> Result<EscrowOutcome, LedgerError> {
    let order = load_order(uow, order_id).await?;
    actor.require_customer_of(&order)?;

    if order.payment_mode != PaymentMode::Escrow {
        return Err(LedgerError::validation(
            "paymentMode",
            format!("order {} is not an ESCROW order", order.id),
        ));
    }
    if order.status != OrderStatus::Pending {
        return Err(LedgerError::InvalidState(format!(
            "order {} is {:?}, expected PENDING",
            order.id, order.status
        )));
    }

    let customer = wallets::get_or_create_wallet(uow, order.customer_id, &order.currency).await?;
    let escrow_wallet =
        wallets::get_or_create_escrow_wallet(uow, order.id, &order.currency).await?;

    let fee_request = ApplyFeesRequest::new(
        FeeCategory::Project,
        order.id.to_string(),
        order.amount.clone(),
        &order.currency,
    )
    .merchant(order.merchant_id)
    .customer_wallet(customer.id);

    let quote = fees::calculate_fees(uow, &fee_request.query()).await?;
    let required = &order.amount + quote.total_for(FeePayer::Customer);
    posting::ensure_funds(uow, customer.id, &required).await?;

    posting::transfer(
        uow,
        Transfer {
            from_wallet: customer.id,
            to_wallet: escrow_wallet.id,
            amount: order.amount.clone(),
            currency: order.currency.clone(),
            debit_reference: format!("esc-{}-fund-cust", order.id),
            credit_reference: format!("esc-{}-fund-escrow", order.id),
            narration: "Escrow funding".to_string(),
            metadata: json!({ "orderId": order.id }),
        },
    )
    .await?;

    let (order, escrow) =
        open_escrow(uow, &order, escrow_wallet.id, &order.amount, release_condition).await?;
    fees::apply_fees(uow, &fee_request).await?;

    tracing::info!(
        order_id = %order.id,
        escrow_id = %escrow.id,
        amount = %escrow.hold_amount,
        "Escrow funded"
    );
    Ok(EscrowOutcome::new(&order, &escrow))
}

/// Pays a held escrow out to the merchant.
pub async fn release(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    order_id: Uuid,
) -> Result<EscrowOutcome, LedgerError> {
    let order = load_order(uow, order_id).await?;
    actor.require_party_to(&order)?;

    if order.status != OrderStatus::InEscrow {
        return Err(LedgerError::InvalidState(format!(
            "order {} is {:?}, expected IN_ESCROW",
            order.id, order.status
        )));
    }
    if order.payment_mode == PaymentMode::Installment {
        return Err(LedgerError::InvalidState(format!(
            "order {} releases automatically when its installment plan completes",
            order.id
        )));
    }

    let escrow = held_escrow(uow, &order).await?;
    let (order, escrow) = settle_release(uow, order, escrow).await?;
    Ok(EscrowOutcome::new(&order, &escrow))
}

/// Returns a held escrow to the customer. Cancelling an already cancelled
/// escrow returns the terminal state again without moving funds.
pub async fn cancel(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    order_id: Uuid,
) -> Result<EscrowOutcome, LedgerError> {
    let order = load_order(uow, order_id).await?;
    actor.require_party_to(&order)?;

    match uow.escrow_for_update(order.id).await? {
        Some(escrow) if escrow.is_cancelled() => {
            tracing::warn!(order_id = %order.id, "Escrow already cancelled");
            Ok(EscrowOutcome::new(&order, &escrow))
        }
        Some(escrow) if escrow.is_released() => Err(LedgerError::InvalidState(format!(
            "escrow for order {} was already released",
            order.id
        ))),
        Some(escrow) if order.status == OrderStatus::InEscrow => {
            let (order, escrow) = return_to_customer(uow, order, escrow, Reversal::Cancel).await?;
            Ok(EscrowOutcome::new(&order, &escrow))
        }
        _ => Err(LedgerError::InvalidState(format!(
            "order {} is {:?}, expected IN_ESCROW",
            order.id, order.status
        ))),
    }
}

/// Same money movement as [`cancel`], but a released escrow is a `Conflict`.
pub async fn refund(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    order_id: Uuid,
) -> Result<EscrowOutcome, LedgerError> {
    let order = load_order(uow, order_id).await?;
    actor.require_party_to(&order)?;

    let escrow = uow
        .escrow_for_update(order.id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("escrow for order {}", order.id)))?;

    match escrow.status {
        EscrowStatus::Released => Err(LedgerError::Conflict(format!(
            "escrow for order {} was already released to the merchant",
            order.id
        ))),
        EscrowStatus::Cancelled => {
            tracing::warn!(order_id = %order.id, "Escrow already refunded");
            Ok(EscrowOutcome::new(&order, &escrow))
        }
        EscrowStatus::Held => {
            let (order, escrow) = return_to_customer(uow, order, escrow, Reversal::Refund).await?;
            Ok(EscrowOutcome::new(&order, &escrow))
        }
    }
}

async fn held_escrow(uow: &mut dyn UnitOfWork, order: &Order) -> Result<GoodsEscrow, LedgerError> {
    let escrow = uow
        .escrow_for_update(order.id)
        .await?
        .ok_or_else(|| LedgerError::InvalidState(format!("order {} has no escrow", order.id)))?;
    if !escrow.is_held() {
        return Err(LedgerError::InvalidState(format!(
            "escrow for order {} is {:?}, expected held",
            order.id, escrow.status
        )));
    }
    Ok(escrow)
}

/// Opens a held escrow for an order whose first funds just landed in its
/// escrow wallet (installment plans). The caller moved the funds.
pub(crate) async fn open_escrow(
    uow: &mut dyn UnitOfWork,
    order: &Order,
    escrow_wallet_id: Uuid,
    amount: &BigDecimal,
    release_condition: &str,
) -> Result<(Order, GoodsEscrow), LedgerError> {
    posting::adjust_hold(uow, escrow_wallet_id, amount).await?;
    let escrow = uow
        .insert_escrow(NewGoodsEscrow::new(
            order.id,
            amount.clone(),
            &order.currency,
            escrow_wallet_id,
            release_condition.to_string(),
        ))
        .await?;
    let order = uow.set_order_status(order.id, OrderStatus::InEscrow).await?;
    Ok((order, escrow))
}

/// Adds freshly escrowed funds to a held escrow.
pub(crate) async fn grow_escrow(
    uow: &mut dyn UnitOfWork,
    escrow: &GoodsEscrow,
    amount: &BigDecimal,
) -> Result<GoodsEscrow, LedgerError> {
    if !escrow.is_held() {
        return Err(LedgerError::InvalidState(format!(
            "escrow for order {} is {:?}, expected held",
            escrow.order_id, escrow.status
        )));
    }
    posting::adjust_hold(uow, escrow.escrow_wallet_id, amount).await?;
    Ok(uow.add_escrow_hold(escrow.id, amount).await?)
}

/// Escrow wallet -> merchant, escrow released, order completed, then
/// MERCHANT_PAYMENT fees charged to the merchant.
pub(crate) async fn settle_release(
    uow: &mut dyn UnitOfWork,
    order: Order,
    escrow: GoodsEscrow,
) -> Result<(Order, GoodsEscrow), LedgerError> {
    let merchant = wallets::get_or_create_wallet(uow, order.merchant_id, &order.currency).await?;

    posting::transfer(
        uow,
        Transfer {
            from_wallet: escrow.escrow_wallet_id,
            to_wallet: merchant.id,
            amount: escrow.hold_amount.clone(),
            currency: escrow.currency.clone(),
            debit_reference: format!("esc-{}-rel-escrow", order.id),
            credit_reference: format!("esc-{}-rel-merchant", order.id),
            narration: "Escrow release".to_string(),
            metadata: json!({ "orderId": order.id }),
        },
    )
    .await?;
    posting::adjust_hold(uow, escrow.escrow_wallet_id, &-escrow.hold_amount.clone()).await?;

    let escrow = uow.settle_escrow(escrow.id, EscrowStatus::Released).await?;
    let order = uow.set_order_status(order.id, OrderStatus::Completed).await?;

    let fee_request = ApplyFeesRequest::new(
        FeeCategory::MerchantPayment,
        order.id.to_string(),
        order.amount.clone(),
        &order.currency,
    )
    .merchant(order.merchant_id)
    .merchant_wallet(merchant.id);
    fees::apply_fees(uow, &fee_request).await?;

    tracing::info!(
        order_id = %order.id,
        escrow_id = %escrow.id,
        amount = %escrow.hold_amount,
        "Escrow released"
    );
    Ok((order, escrow))
}

async fn return_to_customer(
    uow: &mut dyn UnitOfWork,
    order: Order,
    escrow: GoodsEscrow,
    reversal: Reversal,
) -> Result<(Order, GoodsEscrow), LedgerError> {
    let customer = wallets::get_or_create_wallet(uow, order.customer_id, &order.currency).await?;
    let verb = reversal.as_str();

    posting::transfer(
        uow,
        Transfer {
            from_wallet: escrow.escrow_wallet_id,
            to_wallet: customer.id,
            amount: escrow.hold_amount.clone(),
            currency: escrow.currency.clone(),
            debit_reference: format!("esc-{}-{}-escrow", order.id, verb),
            credit_reference: format!("esc-{}-{}-customer", order.id, verb),
            narration: format!("Escrow {}", verb),
            metadata: json!({ "orderId": order.id }),
        },
    )
    .await?;
    posting::adjust_hold(uow, escrow.escrow_wallet_id, &-escrow.hold_amount.clone()).await?;

    let escrow = uow.settle_escrow(escrow.id, EscrowStatus::Cancelled).await?;
    let order = uow.set_order_status(order.id, OrderStatus::Cancelled).await?;

    tracing::info!(
        order_id = %order.id,
        escrow_id = %escrow.id,
        amount = %escrow.hold_amount,
        reversal = verb,
        "Escrow returned to customer"
    );
    Ok((order, escrow))
}
