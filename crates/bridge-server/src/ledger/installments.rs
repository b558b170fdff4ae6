//! Installment plans: an order paid through an ordered schedule of legs.
//!
//! `INSTALLMENT_PAY_AFTER` plans collect every leg in the order's escrow and
//! release to the merchant once the last leg lands. `DELIVER_THEN_COLLECT`
//! plans pay the merchant leg by leg.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::escrow;
use super::fees::{self, ApplyFeesRequest};
use super::orders::load_order;
use super::posting::{self, Transfer, validate_amount};
use super::{wallets, LedgerError};
use crate::authz::Actor;
use crate::models::{
    FeeCategory, FeePayer, InstallmentPlan, LegStatus, NewInstallmentPlan, Order, OrderStatus,
    PaymentMode, PlanMode, PlanStatus,
};
use crate::store::UnitOfWork;

/// Release condition recorded on escrows opened by a plan.
pub const PLAN_RELEASE_CONDITION: &str = "installment_plan_completed";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub order_id: Uuid,
    pub mode: PlanMode,
    /// Leg amounts in the order they must be paid.
    pub schedule: Vec<BigDecimal>,
}

/// Result of paying one leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentPayment {
    pub plan_id: Uuid,
    pub order_id: Uuid,
    pub index: i32,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: LegStatus,
    pub plan_status: PlanStatus,
    pub paid_amount: BigDecimal,
    /// The leg was paid by an earlier call; nothing moved this time.
    pub already_paid: bool,
    /// This payment completed the plan and released the escrow.
    pub escrow_released: bool,
}

impl InstallmentPayment {
    fn new(plan: &InstallmentPlan, index: usize, already_paid: bool, escrow_released: bool) -> Self {
        let (amount, status) = plan
            .leg(index)
            .map(|leg| (leg.amount.clone(), leg.status))
            .unwrap_or_else(|| (BigDecimal::from(0), LegStatus::Unpaid));
        Self {
            plan_id: plan.id,
            order_id: plan.order_id,
            index: index as i32,
            amount,
            currency: plan.currency.clone(),
            status,
            plan_status: plan.status,
            paid_amount: plan.paid_amount.clone(),
            already_paid,
            escrow_released,
        }
    }
}

fn validate_schedule(order: &Order, schedule: &[BigDecimal]) -> Result<(), LedgerError> {
    if schedule.is_empty() {
        return Err(LedgerError::validation(
            "schedule",
            "schedule must contain at least one installment",
        ));
    }
    for (i, amount) in schedule.iter().enumerate() {
        validate_amount(&format!("schedule[{}]", i), amount)?;
    }
    let total: BigDecimal = schedule.iter().sum();
    if total != order.amount {
        return Err(LedgerError::validation(
            "schedule",
            format!(
                "schedule sums to {} but order {} totals {}",
                total, order.id, order.amount
            ),
        ));
    }
    Ok(())
}

/// Attaches a schedule to a pending `INSTALLMENT` order. One plan per order.
pub async fn create_plan(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    request: CreatePlanRequest,
) -> Result<InstallmentPlan, LedgerError> {
    let order = load_order(uow, request.order_id).await?;
    actor.require_customer_of(&order)?;

    if order.payment_mode != PaymentMode::Installment {
        return Err(LedgerError::validation(
            "paymentMode",
            format!("order {} is not an INSTALLMENT order", order.id),
        ));
    }
    if order.status != OrderStatus::Pending {
        return Err(LedgerError::InvalidState(format!(
            "order {} is {:?}, expected PENDING",
            order.id, order.status
        )));
    }
    if uow.plan_for_order(order.id).await?.is_some() {
        return Err(LedgerError::Conflict(format!(
            "order {} already has an installment plan",
            order.id
        )));
    }
    validate_schedule(&order, &request.schedule)?;

    let plan = uow
        .insert_plan(NewInstallmentPlan {
            order_id: order.id,
            mode: request.mode,
            total_amount: order.amount.clone(),
            currency: order.currency.clone(),
            schedule: request.schedule,
        })
        .await?;

    tracing::info!(
        plan_id = %plan.id,
        order_id = %order.id,
        legs = plan.legs.len(),
        mode = ?plan.mode,
        "Installment plan created"
    );
    Ok(plan)
}

async fn load_plan(uow: &mut dyn UnitOfWork, plan_id: Uuid) -> Result<InstallmentPlan, LedgerError> {
    uow.plan_for_update(plan_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("installment plan {}", plan_id)))
}

/// Fetches a plan the actor is a party to.
pub async fn get_plan(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    plan_id: Uuid,
) -> Result<InstallmentPlan, LedgerError> {
    let plan = load_plan(uow, plan_id).await?;
    let order = load_order(uow, plan.order_id).await?;
    actor.require_party_to(&order)?;
    Ok(plan)
}

/// Pays leg `index`. Legs are paid strictly in schedule order; paying an
/// already paid leg returns its state without moving funds.
pub async fn pay_installment(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    plan_id: Uuid,
    index: i64,
) -> Result<InstallmentPayment, LedgerError> {
    let plan = load_plan(uow, plan_id).await?;
    let order = load_order(uow, plan.order_id).await?;
    actor.require_customer_of(&order)?;
    if order.status == OrderStatus::Cancelled {
        return Err(LedgerError::InvalidState(format!("order {} was cancelled", order.id)));
    }

    let idx = usize::try_from(index)
        .ok()
        .filter(|i| *i < plan.legs.len())
        .ok_or_else(|| {
            LedgerError::validation(
                "index",
                format!("plan {} has no installment {}", plan.id, index),
            )
        })?;

    let leg = plan.legs[idx].clone();
    if leg.status == LegStatus::Paid {
        tracing::warn!(plan_id = %plan.id, index = idx, "Installment already paid");
        return Ok(InstallmentPayment::new(&plan, idx, true, false));
    }
    if let Some(next) = plan.first_unpaid_index() {
        if next != idx {
            return Err(LedgerError::validation(
                "index",
                format!("installment {} must be paid before {}", next, idx),
            ));
        }
    }

    let customer = wallets::get_or_create_wallet(uow, order.customer_id, &order.currency).await?;
    let mut fee_request = ApplyFeesRequest::new(
        FeeCategory::Scheduled,
        format!("{}:{}", plan.id, idx),
        leg.amount.clone(),
        &order.currency,
    )
    .merchant(order.merchant_id)
    .customer_wallet(customer.id);

    let quote = fees::calculate_fees(uow, &fee_request.query()).await?;
    let required = &leg.amount + quote.total_for(FeePayer::Customer);
    posting::ensure_funds(uow, customer.id, &required).await?;

    let leg_ref = format!("inst-{}-{}", plan.id, idx);
    let metadata = json!({ "planId": plan.id, "orderId": order.id, "index": idx });

    let mut order = order;
    let mut held = None;
    match plan.mode {
        PlanMode::InstallmentPayAfter => {
            let escrow_wallet =
                wallets::get_or_create_escrow_wallet(uow, order.id, &order.currency).await?;
            posting::transfer(
                uow,
                Transfer {
                    from_wallet: customer.id,
                    to_wallet: escrow_wallet.id,
                    amount: leg.amount.clone(),
                    currency: order.currency.clone(),
                    debit_reference: format!("{}-cust", leg_ref),
                    credit_reference: format!("{}-escrow", leg_ref),
                    narration: format!("Installment {} into escrow", idx + 1),
                    metadata,
                },
            )
            .await?;

            let escrow = match uow.escrow_for_update(order.id).await? {
                Some(escrow) => escrow::grow_escrow(uow, &escrow, &leg.amount).await?,
                None => {
                    let (opened_order, escrow) = escrow::open_escrow(
                        uow,
                        &order,
                        escrow_wallet.id,
                        &leg.amount,
                        PLAN_RELEASE_CONDITION,
                    )
                    .await?;
                    order = opened_order;
                    escrow
                }
            };
            held = Some(escrow);
        }
        PlanMode::DeliverThenCollect => {
            let merchant =
                wallets::get_or_create_wallet(uow, order.merchant_id, &order.currency).await?;
            posting::transfer(
                uow,
                Transfer {
                    from_wallet: customer.id,
                    to_wallet: merchant.id,
                    amount: leg.amount.clone(),
                    currency: order.currency.clone(),
                    debit_reference: format!("{}-cust", leg_ref),
                    credit_reference: format!("{}-mrc", leg_ref),
                    narration: format!("Installment {}", idx + 1),
                    metadata,
                },
            )
            .await?;
            fee_request = fee_request.merchant_wallet(merchant.id);
        }
    }

    let mut plan = uow.mark_leg_paid(plan.id, leg.index, &leg.amount).await?;
    fees::apply_fees(uow, &fee_request).await?;

    tracing::info!(
        plan_id = %plan.id,
        index = idx,
        amount = %leg.amount,
        paid = %plan.paid_amount,
        "Installment paid"
    );

    let mut escrow_released = false;
    if plan.all_paid() {
        plan = uow.complete_plan(plan.id).await?;
        match held {
            Some(escrow) => {
                escrow::settle_release(uow, order.clone(), escrow).await?;
                escrow_released = true;
            }
            None => {
                uow.set_order_status(order.id, OrderStatus::Completed).await?;
            }
        }

        let completion = ApplyFeesRequest::new(
            FeeCategory::InstallmentCompleted,
            plan.id.to_string(),
            plan.total_amount.clone(),
            &plan.currency,
        )
        .merchant(order.merchant_id);
        fees::apply_fees(uow, &completion).await?;

        tracing::info!(plan_id = %plan.id, order_id = %order.id, "Installment plan completed");
    }

    Ok(InstallmentPayment::new(&plan, idx, false, escrow_released))
}
