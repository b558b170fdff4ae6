//! Idempotency races the in-memory store cannot produce on its own.
//!
//! `StaleReads` wraps the memory store and makes the next idempotency lookup
//! miss, as when a concurrent request with the same key commits between this
//! request's lookup and its own insert.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use bridge_server::authz::Actor;
use bridge_server::ledger::{
    CreateOrderRequest, DepositRequest, Ledger, LedgerMetrics, LedgerSettings, NoopQueue,
};
use bridge_server::models::{
    BillingLedgerEntry, EscrowStatus, FeeRule, GoodsEscrow, IdempotencyRecord, InstallmentPlan,
    LedgerEntry, MerchantFeeOverride, NewBillingLedgerEntry, NewGoodsEscrow,
    NewIdempotencyRecord, NewInstallmentPlan, NewLedgerEntry, NewOrder, NewWallet, Order,
    OrderStatus, PaymentMode, Role, Wallet, WalletOwner,
};
use bridge_server::store::{LedgerStore, MemoryStore, StoreError, UnitOfWork};

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

#[derive(Clone)]
struct StaleReads {
    inner: MemoryStore,
    miss_next: Arc<AtomicBool>,
}

impl StaleReads {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            miss_next: Arc::new(AtomicBool::new(false)),
        }
    }

    fn miss_next_lookup(&self) {
        self.miss_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for StaleReads {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(StaleUnit {
            inner: self.inner.begin().await?,
            miss_next: self.miss_next.clone(),
        }))
    }
}

struct StaleUnit {
    inner: Box<dyn UnitOfWork>,
    miss_next: Arc<AtomicBool>,
}

#[async_trait]
impl UnitOfWork for StaleUnit {
    async fn find_wallet(
        &mut self,
        owner: &WalletOwner,
        currency: &str,
    ) -> Result<Option<Wallet>, StoreError> {
        self.inner.find_wallet(owner, currency).await
    }

    async fn insert_wallet(&mut self, wallet: NewWallet) -> Result<Wallet, StoreError> {
        self.inner.insert_wallet(wallet).await
    }

    async fn wallet_for_update(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>, StoreError> {
        self.inner.wallet_for_update(wallet_id).await
    }

    async fn apply_ledger_entry(
        &mut self,
        entry: NewLedgerEntry,
    ) -> Result<LedgerEntry, StoreError> {
        self.inner.apply_ledger_entry(entry).await
    }

    async fn adjust_hold(
        &mut self,
        wallet_id: Uuid,
        delta: &BigDecimal,
    ) -> Result<Wallet, StoreError> {
        self.inner.adjust_hold(wallet_id, delta).await
    }

    async fn recent_ledger_entries(
        &mut self,
        wallet_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.recent_ledger_entries(wallet_id, limit).await
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        self.inner.insert_order(order).await
    }

    async fn order_for_update(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        self.inner.order_for_update(order_id).await
    }

    async fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        self.inner.set_order_status(order_id, status).await
    }

    async fn escrow_for_update(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<GoodsEscrow>, StoreError> {
        self.inner.escrow_for_update(order_id).await
    }

    async fn insert_escrow(&mut self, escrow: NewGoodsEscrow) -> Result<GoodsEscrow, StoreError> {
        self.inner.insert_escrow(escrow).await
    }

    async fn add_escrow_hold(
        &mut self,
        escrow_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<GoodsEscrow, StoreError> {
        self.inner.add_escrow_hold(escrow_id, amount).await
    }

    async fn settle_escrow(
        &mut self,
        escrow_id: Uuid,
        status: EscrowStatus,
    ) -> Result<GoodsEscrow, StoreError> {
        self.inner.settle_escrow(escrow_id, status).await
    }

    async fn insert_plan(
        &mut self,
        plan: NewInstallmentPlan,
    ) -> Result<InstallmentPlan, StoreError> {
        self.inner.insert_plan(plan).await
    }

    async fn plan_for_update(
        &mut self,
        plan_id: Uuid,
    ) -> Result<Option<InstallmentPlan>, StoreError> {
        self.inner.plan_for_update(plan_id).await
    }

    async fn plan_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<InstallmentPlan>, StoreError> {
        self.inner.plan_for_order(order_id).await
    }

    async fn mark_leg_paid(
        &mut self,
        plan_id: Uuid,
        index: i32,
        amount: &BigDecimal,
    ) -> Result<InstallmentPlan, StoreError> {
        self.inner.mark_leg_paid(plan_id, index, amount).await
    }

    async fn complete_plan(&mut self, plan_id: Uuid) -> Result<InstallmentPlan, StoreError> {
        self.inner.complete_plan(plan_id).await
    }

    async fn fee_rules(&mut self, applies_to: &str) -> Result<Vec<FeeRule>, StoreError> {
        self.inner.fee_rules(applies_to).await
    }

    async fn upsert_fee_rule(&mut self, rule: FeeRule) -> Result<(), StoreError> {
        self.inner.upsert_fee_rule(rule).await
    }

    async fn merchant_fee_overrides(
        &mut self,
        merchant_id: Uuid,
    ) -> Result<Vec<MerchantFeeOverride>, StoreError> {
        self.inner.merchant_fee_overrides(merchant_id).await
    }

    async fn billing_entries_for(
        &mut self,
        transaction_id: &str,
    ) -> Result<Vec<BillingLedgerEntry>, StoreError> {
        self.inner.billing_entries_for(transaction_id).await
    }

    async fn insert_billing_entry(
        &mut self,
        entry: NewBillingLedgerEntry,
    ) -> Result<Option<BillingLedgerEntry>, StoreError> {
        self.inner.insert_billing_entry(entry).await
    }

    async fn find_idempotency(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        if self.miss_next.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_idempotency(key).await
    }

    async fn insert_idempotency(
        &mut self,
        record: NewIdempotencyRecord,
    ) -> Result<bool, StoreError> {
        self.inner.insert_idempotency(record).await
    }

    async fn purge_idempotency(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.purge_idempotency(now).await
    }

    async fn user_role(&mut self, user_id: Uuid) -> Result<Option<Role>, StoreError> {
        self.inner.user_role(user_id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }
}

fn ledger_over(store: &StaleReads) -> Ledger {
    Ledger::new(
        Arc::new(store.clone()),
        Arc::new(NoopQueue),
        Arc::new(LedgerMetrics::new()),
        LedgerSettings::default(),
    )
}

fn deposit_request(user_id: Uuid, amount: &str) -> DepositRequest {
    DepositRequest {
        user_id: Some(user_id),
        amount: dec(amount),
        currency: "KES".to_string(),
        funding_source: None,
    }
}

#[tokio::test]
async fn test_losing_the_key_insert_replays_the_winner() {
    let memory = MemoryStore::new();
    let store = StaleReads::new(memory.clone());
    let ledger = ledger_over(&store);
    let admin = Actor::new(Uuid::new_v4(), Role::Admin);
    let cust = Uuid::new_v4();

    let winner = ledger
        .deposit(admin, deposit_request(cust, "400"), Some("dep-1"))
        .await
        .unwrap();
    let entries = memory.ledger_entries().await.len();

    // The retry does not see the stored key, performs the work, then loses
    // the key insert.
    store.miss_next_lookup();
    let loser = ledger
        .deposit(admin, deposit_request(cust, "400"), Some("dep-1"))
        .await
        .unwrap();

    assert_eq!(loser, winner);
    assert_eq!(memory.ledger_entries().await.len(), entries);
    assert_eq!(memory.wallet(winner.wallet_id).await.unwrap().balance, dec("400"));
    assert_eq!(ledger.metrics().snapshot().replays, 1);
    assert_eq!(memory.idempotency_records().await.len(), 1);
}

#[tokio::test]
async fn test_failed_retry_replays_committed_response() {
    let memory = MemoryStore::new();
    let store = StaleReads::new(memory.clone());
    let ledger = ledger_over(&store);
    let admin = Actor::new(Uuid::new_v4(), Role::Admin);
    let (cust, mrc) = (Uuid::new_v4(), Uuid::new_v4());
    let customer = Actor::new(cust, Role::Customer);

    ledger
        .deposit(admin, deposit_request(cust, "1000"), None)
        .await
        .unwrap();
    let order = ledger
        .create_order(
            customer,
            CreateOrderRequest {
                customer_id: None,
                merchant_id: mrc,
                amount: dec("300"),
                currency: "KES".to_string(),
                payment_mode: PaymentMode::Direct,
            },
            None,
        )
        .await
        .unwrap();
    let first = ledger.pay_now(customer, order.id, Some("pay-1")).await.unwrap();

    // The retry misses the key, finds the order already completed, and
    // answers with the stored response instead of the state error.
    store.miss_next_lookup();
    let retry = ledger.pay_now(customer, order.id, Some("pay-1")).await.unwrap();
    assert_eq!(retry, first);
    assert_eq!(ledger.metrics().snapshot().replays, 1);

    // Without a key the state error stands.
    let err = ledger.pay_now(customer, order.id, None).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_state");
}
