//! Ledger core: wallets, transfers, postings, fees, escrow and installment plans.
//!
//! Every mutating operation runs as one unit of work: the idempotency lookup,
//! all ledger legs, fee postings, state transitions and the idempotency
//! record commit together or not at all. Payment events are published only
//! after the commit.

pub mod error;
pub mod escrow;
pub mod fees;
pub mod idempotency;
pub mod installments;
pub mod metrics;
pub mod orders;
pub mod posting;
pub mod queue;
pub mod transfers;
pub mod wallets;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::authz::Actor;
use crate::models::{InstallmentPlan, Order, PlanStatus};
use crate::store::{LedgerStore, StoreError, UnitOfWork};

pub use error::LedgerError;
pub use escrow::EscrowOutcome;
pub use fees::{AppliedFee, AppliedFeesResult, ApplyFeesRequest, FeeBreakdown, FeeLine, FeeQuery};
pub use idempotency::IdempotencyGuard;
pub use installments::{CreatePlanRequest, InstallmentPayment};
pub use metrics::{LedgerMetrics, MetricsSnapshot};
pub use orders::{CreateOrderRequest, DepositOutcome, DepositRequest, PaymentOutcome};
pub use queue::{ChannelQueue, NoopQueue, PaymentEvent, PaymentQueue, QueueError};
pub use transfers::{TransferOutcome, TransferRequest, WithdrawRequest, WithdrawalOutcome};
pub use wallets::WalletSummary;

/// Currencies accepted when no configuration overrides them.
pub const DEFAULT_CURRENCIES: [&str; 5] = ["KES", "UGX", "TZS", "RWF", "ETB"];

/// Runtime knobs of the ledger core.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub supported_currencies: Vec<String>,
    pub idempotency_ttl: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            supported_currencies: DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect(),
            idempotency_ttl: Duration::hours(idempotency::DEFAULT_TTL_HOURS),
        }
    }
}

impl LedgerSettings {
    pub fn validate_currency(&self, currency: &str) -> Result<(), LedgerError> {
        if self.supported_currencies.iter().any(|c| c == currency) {
            Ok(())
        } else {
            Err(LedgerError::validation(
                "currency",
                format!("unsupported currency {}", currency),
            ))
        }
    }
}

/// Future returned by work run inside a unit of work.
pub type UnitFuture<'u, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'u>>;

/// Identifier stored with an idempotency record.
pub trait Entity {
    fn entity_id(&self) -> String;
}

impl Entity for Order {
    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

impl Entity for PaymentOutcome {
    fn entity_id(&self) -> String {
        self.order_id.to_string()
    }
}

impl Entity for DepositOutcome {
    fn entity_id(&self) -> String {
        self.deposit_id.to_string()
    }
}

impl Entity for TransferOutcome {
    fn entity_id(&self) -> String {
        self.reference.clone()
    }
}

impl Entity for WithdrawalOutcome {
    fn entity_id(&self) -> String {
        self.withdrawal_id.to_string()
    }
}

impl Entity for EscrowOutcome {
    fn entity_id(&self) -> String {
        self.order_id.to_string()
    }
}

impl Entity for InstallmentPlan {
    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

impl Entity for InstallmentPayment {
    fn entity_id(&self) -> String {
        format!("{}:{}", self.plan_id, self.index)
    }
}

impl Entity for AppliedFeesResult {
    fn entity_id(&self) -> String {
        self.transaction_id.clone()
    }
}

enum Execution<T> {
    Fresh(T),
    Replayed(T),
}

fn request_value<T: Serialize>(actor: &Actor, body: &T) -> Result<Value, LedgerError> {
    let body = serde_json::to_value(body).map_err(StoreError::from)?;
    Ok(json!({ "actor": actor.user_id, "body": body }))
}

fn fee_events(fees: &AppliedFeesResult) -> Option<PaymentEvent> {
    (!fees.applied.is_empty()).then(|| PaymentEvent::FeesApplied {
        transaction_id: fees.transaction_id.clone(),
        total: fees.total.clone(),
        currency: fees.currency.clone(),
    })
}

/// Service façade over the store, event queue and metrics registry.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    queue: Arc<dyn PaymentQueue>,
    metrics: Arc<LedgerMetrics>,
    settings: Arc<LedgerSettings>,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        queue: Arc<dyn PaymentQueue>,
        metrics: Arc<LedgerMetrics>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            store,
            queue,
            metrics,
            settings: Arc::new(settings),
        }
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    // ----- orders and wallets -----

    pub async fn create_order(
        &self,
        actor: Actor,
        request: CreateOrderRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Order, LedgerError> {
        let fingerprint = request_value(&actor, &request)?;
        let settings = self.settings.clone();
        self.guarded(
            "order.create",
            actor.user_id,
            idempotency_key,
            fingerprint,
            move |uow| {
                Box::pin(async move { orders::create_order(uow, &actor, request, &settings).await })
            },
            |_| Vec::new(),
        )
        .await
    }

    pub async fn get_order(&self, actor: Actor, order_id: Uuid) -> Result<Order, LedgerError> {
        self.read("order.get", move |uow| {
            Box::pin(async move { orders::get_order(uow, &actor, order_id).await })
        })
        .await
    }

    pub async fn pay_now(
        &self,
        actor: Actor,
        order_id: Uuid,
        idempotency_key: Option<&str>,
    ) -> Result<PaymentOutcome, LedgerError> {
        self.guarded(
            "order.pay_now",
            actor.user_id,
            idempotency_key,
            json!({ "actor": actor.user_id, "orderId": order_id }),
            move |uow| Box::pin(async move { orders::pay_now(uow, &actor, order_id).await }),
            |outcome| {
                let mut events = vec![PaymentEvent::OrderPaid {
                    order_id: outcome.order_id,
                    amount: outcome.amount.clone(),
                    currency: outcome.currency.clone(),
                }];
                events.extend(fee_events(&outcome.fees));
                events
            },
        )
        .await
    }

    pub async fn deposit(
        &self,
        actor: Actor,
        request: DepositRequest,
        idempotency_key: Option<&str>,
    ) -> Result<DepositOutcome, LedgerError> {
        let fingerprint = request_value(&actor, &request)?;
        let settings = self.settings.clone();
        self.guarded(
            "wallet.deposit",
            actor.user_id,
            idempotency_key,
            fingerprint,
            move |uow| Box::pin(async move { orders::deposit(uow, &actor, request, &settings).await }),
            |outcome| {
                let mut events = vec![PaymentEvent::WalletToppedUp {
                    wallet_id: outcome.wallet_id,
                    amount: outcome.amount.clone(),
                    currency: outcome.currency.clone(),
                }];
                events.extend(fee_events(&outcome.fees));
                events
            },
        )
        .await
    }

    /// The caller's wallet in `currency`, created on first access.
    pub async fn wallet_summary(
        &self,
        actor: Actor,
        currency: String,
    ) -> Result<WalletSummary, LedgerError> {
        if let Err(err) = self.settings.validate_currency(&currency) {
            return self.observe("wallet.summary", Err(err));
        }
        self.read("wallet.summary", move |uow| {
            Box::pin(async move { wallets::wallet_summary(uow, actor.user_id, &currency).await })
        })
        .await
    }

    /// Moves funds from the caller's wallet to another user's wallet.
    pub async fn transfer(
        &self,
        actor: Actor,
        request: TransferRequest,
        idempotency_key: Option<&str>,
    ) -> Result<TransferOutcome, LedgerError> {
        let fingerprint = request_value(&actor, &request)?;
        let settings = self.settings.clone();
        self.guarded(
            "wallet.transfer",
            actor.user_id,
            idempotency_key,
            fingerprint,
            move |uow| {
                Box::pin(async move { transfers::transfer(uow, &actor, request, &settings).await })
            },
            |outcome| {
                vec![PaymentEvent::WalletTransferred {
                    reference: outcome.reference.clone(),
                    from_wallet_id: outcome.sender_wallet_id,
                    to_wallet_id: outcome.receiver_wallet_id,
                    amount: outcome.amount.clone(),
                    currency: outcome.currency.clone(),
                }]
            },
        )
        .await
    }

    /// Pays funds out of the caller's wallet, charging withdrawal fees.
    pub async fn withdraw(
        &self,
        actor: Actor,
        request: WithdrawRequest,
        idempotency_key: Option<&str>,
    ) -> Result<WithdrawalOutcome, LedgerError> {
        let fingerprint = request_value(&actor, &request)?;
        let settings = self.settings.clone();
        self.guarded(
            "wallet.withdraw",
            actor.user_id,
            idempotency_key,
            fingerprint,
            move |uow| {
                Box::pin(async move { transfers::withdraw(uow, &actor, request, &settings).await })
            },
            |outcome| {
                let mut events = vec![PaymentEvent::WalletWithdrawn {
                    withdrawal_id: outcome.withdrawal_id,
                    wallet_id: outcome.wallet_id,
                    amount: outcome.amount.clone(),
                    currency: outcome.currency.clone(),
                }];
                events.extend(fee_events(&outcome.fees));
                events
            },
        )
        .await
    }

    // ----- escrow -----

    pub async fn escrow_fund(
        &self,
        actor: Actor,
        order_id: Uuid,
        release_condition: String,
        idempotency_key: Option<&str>,
    ) -> Result<EscrowOutcome, LedgerError> {
        let fingerprint = json!({
            "actor": actor.user_id,
            "orderId": order_id,
            "releaseCondition": release_condition,
        });
        self.guarded(
            "escrow.fund",
            actor.user_id,
            idempotency_key,
            fingerprint,
            move |uow| {
                Box::pin(async move {
                    escrow::fund(uow, &actor, order_id, &release_condition).await
                })
            },
            |outcome| {
                vec![PaymentEvent::EscrowFunded {
                    order_id: outcome.order_id,
                    amount: outcome.hold_amount.clone(),
                    currency: outcome.currency.clone(),
                }]
            },
        )
        .await
    }

    pub async fn escrow_release(
        &self,
        actor: Actor,
        order_id: Uuid,
        idempotency_key: Option<&str>,
    ) -> Result<EscrowOutcome, LedgerError> {
        self.guarded(
            "escrow.release",
            actor.user_id,
            idempotency_key,
            json!({ "actor": actor.user_id, "orderId": order_id }),
            move |uow| Box::pin(async move { escrow::release(uow, &actor, order_id).await }),
            |outcome| {
                vec![PaymentEvent::EscrowReleased {
                    order_id: outcome.order_id,
                    amount: outcome.hold_amount.clone(),
                    currency: outcome.currency.clone(),
                }]
            },
        )
        .await
    }

    pub async fn escrow_cancel(
        &self,
        actor: Actor,
        order_id: Uuid,
        idempotency_key: Option<&str>,
    ) -> Result<EscrowOutcome, LedgerError> {
        self.guarded(
            "escrow.cancel",
            actor.user_id,
            idempotency_key,
            json!({ "actor": actor.user_id, "orderId": order_id }),
            move |uow| Box::pin(async move { escrow::cancel(uow, &actor, order_id).await }),
            |outcome| {
                vec![PaymentEvent::EscrowCancelled {
                    order_id: outcome.order_id,
                    amount: outcome.hold_amount.clone(),
                    currency: outcome.currency.clone(),
                }]
            },
        )
        .await
    }

    pub async fn escrow_refund(
        &self,
        actor: Actor,
        order_id: Uuid,
        idempotency_key: Option<&str>,
    ) -> Result<EscrowOutcome, LedgerError> {
        self.guarded(
            "escrow.refund",
            actor.user_id,
            idempotency_key,
            json!({ "actor": actor.user_id, "orderId": order_id }),
            move |uow| Box::pin(async move { escrow::refund(uow, &actor, order_id).await }),
            |outcome| {
                vec![PaymentEvent::EscrowRefunded {
                    order_id: outcome.order_id,
                    amount: outcome.hold_amount.clone(),
                    currency: outcome.currency.clone(),
                }]
            },
        )
        .await
    }

    // ----- installment plans -----

    pub async fn create_plan(
        &self,
        actor: Actor,
        request: CreatePlanRequest,
        idempotency_key: Option<&str>,
    ) -> Result<InstallmentPlan, LedgerError> {
        let fingerprint = request_value(&actor, &request)?;
        self.guarded(
            "plan.create",
            actor.user_id,
            idempotency_key,
            fingerprint,
            move |uow| {
                Box::pin(async move { installments::create_plan(uow, &actor, request).await })
            },
            |_| Vec::new(),
        )
        .await
    }

    pub async fn get_plan(
        &self,
        actor: Actor,
        plan_id: Uuid,
    ) -> Result<InstallmentPlan, LedgerError> {
        self.read("plan.get", move |uow| {
            Box::pin(async move { installments::get_plan(uow, &actor, plan_id).await })
        })
        .await
    }

    pub async fn pay_installment(
        &self,
        actor: Actor,
        plan_id: Uuid,
        index: i64,
        idempotency_key: Option<&str>,
    ) -> Result<InstallmentPayment, LedgerError> {
        self.guarded(
            "plan.pay",
            actor.user_id,
            idempotency_key,
            json!({ "actor": actor.user_id, "planId": plan_id, "index": index }),
            move |uow| {
                Box::pin(async move {
                    installments::pay_installment(uow, &actor, plan_id, index).await
                })
            },
            |payment| {
                if payment.already_paid {
                    return Vec::new();
                }
                let mut events = vec![PaymentEvent::InstallmentPaid {
                    plan_id: payment.plan_id,
                    order_id: payment.order_id,
                    index: payment.index,
                    amount: payment.amount.clone(),
                }];
                if payment.plan_status == PlanStatus::Completed {
                    events.push(PaymentEvent::PlanCompleted {
                        plan_id: payment.plan_id,
                        order_id: payment.order_id,
                    });
                }
                if payment.escrow_released {
                    events.push(PaymentEvent::EscrowReleased {
                        order_id: payment.order_id,
                        amount: payment.paid_amount.clone(),
                        currency: payment.currency.clone(),
                    });
                }
                events
            },
        )
        .await
    }

    // ----- billing -----

    /// Prices a transaction without recording anything.
    pub async fn calculate_fees(&self, query: FeeQuery) -> Result<FeeBreakdown, LedgerError> {
        if let Err(err) = self
            .settings
            .validate_currency(&query.currency)
            .and_then(|_| posting::validate_amount("amount", &query.amount))
        {
            return self.observe("billing.calculate", Err(err));
        }
        self.read("billing.calculate", move |uow| {
            Box::pin(async move { fees::calculate_fees(uow, &query).await })
        })
        .await
    }

    /// Records fees for an externally settled transaction. Admin only.
    pub async fn apply_fees(
        &self,
        actor: Actor,
        request: ApplyFeesRequest,
    ) -> Result<AppliedFeesResult, LedgerError> {
        if let Err(err) = actor.require_admin() {
            return self.observe("billing.apply", Err(err));
        }
        if let Err(err) = self
            .settings
            .validate_currency(&request.currency)
            .and_then(|_| posting::validate_amount("baseAmount", &request.base_amount))
            .and_then(|_| fees::validate_transaction_id(&request.transaction_id))
        {
            return self.observe("billing.apply", Err(err));
        }

        let key = request.idempotency_key.clone();
        let fingerprint = request_value(&actor, &request)?;
        self.guarded(
            "billing.apply",
            actor.user_id,
            key.as_deref(),
            fingerprint,
            move |uow| Box::pin(async move { fees::apply_fees(uow, &request).await }),
            |result| fee_events(result).into_iter().collect(),
        )
        .await
    }

    /// Inserts or refreshes the default fee catalog.
    pub async fn seed_fee_catalog(&self) -> Result<usize, LedgerError> {
        self.read("billing.seed", |uow| {
            Box::pin(async move { fees::seed_default_catalog(uow).await })
        })
        .await
    }

    /// Deletes idempotency records past their expiry.
    pub async fn purge_expired_idempotency(&self) -> Result<u64, LedgerError> {
        let result = idempotency::purge_expired(self.store.as_ref(), Utc::now()).await;
        self.observe("idempotency.purge", result)
    }

    // ----- execution -----

    async fn guarded<T, F, E>(
        &self,
        operation: &'static str,
        user_id: Uuid,
        key: Option<&str>,
        request: Value,
        work: F,
        events: E,
    ) -> Result<T, LedgerError>
    where
        T: Serialize + DeserializeOwned + Entity + Send,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> UnitFuture<'u, T> + Send,
        E: FnOnce(&T) -> Vec<PaymentEvent>,
    {
        match self.execute(operation, user_id, key, request, work).await {
            Ok(Execution::Fresh(value)) => {
                self.metrics.record_success();
                self.publish(events(&value)).await;
                Ok(value)
            }
            Ok(Execution::Replayed(value)) => {
                self.metrics.record_replay();
                tracing::warn!(operation, key = ?key, "Replaying stored response");
                Ok(value)
            }
            Err(err) => self.observe(operation, Err(err)),
        }
    }

    async fn execute<T, F>(
        &self,
        operation: &'static str,
        user_id: Uuid,
        key: Option<&str>,
        request: Value,
        work: F,
    ) -> Result<Execution<T>, LedgerError>
    where
        T: Serialize + DeserializeOwned + Entity + Send,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> UnitFuture<'u, T> + Send,
    {
        let guard = IdempotencyGuard::new(
            user_id,
            key,
            operation,
            &request,
            self.settings.idempotency_ttl,
        )?;

        let mut uow = self.store.begin().await?;
        if let Some(stored) = guard.replay::<T>(uow.as_mut()).await? {
            return Ok(Execution::Replayed(stored));
        }

        let value = match work(uow.as_mut()).await {
            Ok(value) => value,
            Err(err) => {
                drop(uow);
                // A concurrent request with the same key may have committed
                // the state change this one tripped over.
                return match self.replay_committed::<T>(&guard).await {
                    Ok(Some(stored)) => Ok(Execution::Replayed(stored)),
                    _ => Err(err),
                };
            }
        };
        if !guard.record(uow.as_mut(), &value.entity_id(), &value).await? {
            // Lost the race for the key: roll back and hand out the winner's response.
            drop(uow);
            return match self.replay_committed::<T>(&guard).await? {
                Some(stored) => Ok(Execution::Replayed(stored)),
                None => Err(LedgerError::Conflict(format!(
                    "idempotency key for {} is being processed",
                    operation
                ))),
            };
        }
        uow.commit().await?;
        Ok(Execution::Fresh(value))
    }

    /// Stored response for the guard's key, read in a fresh unit of work.
    async fn replay_committed<T>(
        &self,
        guard: &IdempotencyGuard,
    ) -> Result<Option<T>, LedgerError>
    where
        T: DeserializeOwned,
    {
        if guard.key().is_none() {
            return Ok(None);
        }
        let mut uow = self.store.begin().await?;
        guard.replay::<T>(uow.as_mut()).await
    }

    async fn read<T, F>(&self, operation: &'static str, work: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> UnitFuture<'u, T> + Send,
    {
        let result = async {
            let mut uow = self.store.begin().await?;
            let value = work(uow.as_mut()).await?;
            uow.commit().await?;
            Ok(value)
        }
        .await;
        self.observe(operation, result)
    }

    fn observe<T>(
        &self,
        operation: &'static str,
        result: Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        if let Err(err) = &result {
            self.metrics.record_failure(err);
            match err {
                LedgerError::Storage(e) => {
                    tracing::error!(operation, error = %e, "Ledger operation failed")
                }
                _ => tracing::warn!(
                    operation,
                    kind = err.kind(),
                    error = %err,
                    "Ledger operation rejected"
                ),
            }
        }
        result
    }

    async fn publish(&self, events: Vec<PaymentEvent>) {
        for event in events {
            let name = event.name();
            if let Err(e) = self.queue.publish(event).await {
                self.metrics.record_queue_failure();
                tracing::warn!(event = name, error = %e, "Failed to publish payment event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = LedgerSettings::default();
        assert!(settings.validate_currency("KES").is_ok());
        assert!(settings.validate_currency("ETB").is_ok());
        assert_eq!(settings.idempotency_ttl, Duration::hours(24));

        let err = settings.validate_currency("USD").unwrap_err();
        assert!(matches!(err, LedgerError::Validation { ref field, .. } if field == "currency"));
    }
}
