//! In-process store used by tests and development mode.
//!
//! A unit of work takes the store lock for its whole lifetime and mutates a
//! private copy of the state; `commit` swaps the copy in. Writers are fully
//! serialized, which is a stricter form of the row locks the Postgres store
//! takes.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LedgerStore, StoreError, UnitOfWork};
use crate::models::{
    BillingLedgerEntry, EntryDirection, EscrowStatus, FeeRule, GoodsEscrow, IdempotencyRecord,
    InstallmentLeg, InstallmentPlan, LedgerEntry, LegStatus, MerchantFeeOverride,
    NewBillingLedgerEntry, NewGoodsEscrow, NewIdempotencyRecord, NewInstallmentPlan,
    NewLedgerEntry, NewOrder, NewWallet, Order, OrderStatus, PlanStatus, Role, Wallet,
    WalletOwner,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    wallets: HashMap<Uuid, Wallet>,
    ledger: Vec<LedgerEntry>,
    orders: HashMap<Uuid, Order>,
    /// Keyed by order id.
    escrows: HashMap<Uuid, GoodsEscrow>,
    plans: HashMap<Uuid, InstallmentPlan>,
    fee_rules: Vec<FeeRule>,
    fee_overrides: Vec<MerchantFeeOverride>,
    billing: Vec<BillingLedgerEntry>,
    idempotency: HashMap<String, IdempotencyRecord>,
    roles: HashMap<Uuid, Role>,
}

/// Shared in-memory store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_role(&self, user_id: Uuid, role: Role) {
        self.state.lock().await.roles.insert(user_id, role);
    }

    pub async fn add_fee_override(&self, fee_override: MerchantFeeOverride) {
        let mut state = self.state.lock().await;
        state.fee_overrides.retain(|o| {
            !(o.merchant_id == fee_override.merchant_id && o.fee_code == fee_override.fee_code)
        });
        state.fee_overrides.push(fee_override);
    }

    /// Every ledger entry in posting order.
    pub async fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.ledger.clone()
    }

    pub async fn billing_entries(&self) -> Vec<BillingLedgerEntry> {
        self.state.lock().await.billing.clone()
    }

    pub async fn wallet(&self, wallet_id: Uuid) -> Option<Wallet> {
        self.state.lock().await.wallets.get(&wallet_id).cloned()
    }

    pub async fn idempotency_records(&self) -> Vec<IdempotencyRecord> {
        self.state.lock().await.idempotency.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let committed = self.state.clone().lock_owned().await;
        let working = committed.clone();
        Ok(Box::new(MemoryUnitOfWork { committed, working }))
    }
}

pub struct MemoryUnitOfWork {
    committed: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryUnitOfWork {
    fn wallet_mut(&mut self, wallet_id: Uuid) -> Result<&mut Wallet, StoreError> {
        self.working
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| StoreError::MissingRow(format!("wallet {}", wallet_id)))
    }

    fn escrow_mut(&mut self, escrow_id: Uuid) -> Result<&mut GoodsEscrow, StoreError> {
        self.working
            .escrows
            .values_mut()
            .find(|e| e.id == escrow_id)
            .ok_or_else(|| StoreError::MissingRow(format!("goods escrow {}", escrow_id)))
    }

    fn plan_mut(&mut self, plan_id: Uuid) -> Result<&mut InstallmentPlan, StoreError> {
        self.working
            .plans
            .get_mut(&plan_id)
            .ok_or_else(|| StoreError::MissingRow(format!("installment plan {}", plan_id)))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_wallet(
        &mut self,
        owner: &WalletOwner,
        currency: &str,
    ) -> Result<Option<Wallet>, StoreError> {
        Ok(self
            .working
            .wallets
            .values()
            .find(|w| owner.matches(w) && w.currency == currency)
            .cloned())
    }

    async fn insert_wallet(&mut self, wallet: NewWallet) -> Result<Wallet, StoreError> {
        let owner = match wallet.kind {
            crate::models::WalletKind::User => wallet.user_id.map(WalletOwner::User),
            crate::models::WalletKind::Escrow => wallet.order_id.map(WalletOwner::Escrow),
            crate::models::WalletKind::Platform => Some(WalletOwner::Platform),
            crate::models::WalletKind::Settlement => Some(WalletOwner::Settlement),
        };
        if let Some(owner) = owner {
            if let Some(existing) = self.find_wallet(&owner, &wallet.currency).await? {
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let created = Wallet {
            id: Uuid::new_v4(),
            kind: wallet.kind,
            user_id: wallet.user_id,
            order_id: wallet.order_id,
            currency: wallet.currency,
            balance: BigDecimal::from(0),
            hold: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
        };
        self.working.wallets.insert(created.id, created.clone());
        Ok(created)
    }

    async fn wallet_for_update(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>, StoreError> {
        Ok(self.working.wallets.get(&wallet_id).cloned())
    }

    async fn apply_ledger_entry(
        &mut self,
        entry: NewLedgerEntry,
    ) -> Result<LedgerEntry, StoreError> {
        if self.working.ledger.iter().any(|e| e.reference == entry.reference) {
            return Err(StoreError::DuplicateReference(entry.reference));
        }

        let delta = entry.signed_amount();
        let now = Utc::now();
        let wallet = self.wallet_mut(entry.wallet_id)?;
        wallet.balance = &wallet.balance + &delta;
        wallet.updated_at = now;
        let balance_after = wallet.balance.clone();

        let posted = LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: entry.wallet_id,
            counterparty_wallet_id: entry.counterparty_wallet_id,
            direction: entry.direction,
            amount: entry.amount,
            currency: entry.currency,
            reference: entry.reference,
            narration: entry.narration,
            metadata: entry.metadata,
            balance_after,
            created_at: now,
        };
        self.working.ledger.push(posted.clone());
        Ok(posted)
    }

    async fn adjust_hold(
        &mut self,
        wallet_id: Uuid,
        delta: &BigDecimal,
    ) -> Result<Wallet, StoreError> {
        let wallet = self.wallet_mut(wallet_id)?;
        wallet.hold = &wallet.hold + delta;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn recent_ledger_entries(
        &mut self,
        wallet_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .ledger
            .iter()
            .rev()
            .filter(|e| e.wallet_id == wallet_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let now = Utc::now();
        let created = Order {
            id: Uuid::new_v4(),
            customer_id: order.customer_id,
            merchant_id: order.merchant_id,
            amount: order.amount,
            currency: order.currency,
            payment_mode: order.payment_mode,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.working.orders.insert(created.id, created.clone());
        Ok(created)
    }

    async fn order_for_update(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::MissingRow(format!("order {}", order_id)))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn escrow_for_update(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<GoodsEscrow>, StoreError> {
        Ok(self.working.escrows.get(&order_id).cloned())
    }

    async fn insert_escrow(&mut self, escrow: NewGoodsEscrow) -> Result<GoodsEscrow, StoreError> {
        if self.working.escrows.contains_key(&escrow.order_id) {
            return Err(StoreError::Constraint(format!(
                "goods escrow already exists for order {}",
                escrow.order_id
            )));
        }
        let created = GoodsEscrow {
            id: Uuid::new_v4(),
            order_id: escrow.order_id,
            hold_amount: escrow.hold_amount,
            currency: escrow.currency,
            escrow_wallet_id: escrow.escrow_wallet_id,
            release_condition: escrow.release_condition,
            status: EscrowStatus::Held,
            created_at: Utc::now(),
            settled_at: None,
        };
        self.working.escrows.insert(created.order_id, created.clone());
        Ok(created)
    }

    async fn add_escrow_hold(
        &mut self,
        escrow_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<GoodsEscrow, StoreError> {
        let escrow = self.escrow_mut(escrow_id)?;
        escrow.hold_amount = &escrow.hold_amount + amount;
        Ok(escrow.clone())
    }

    async fn settle_escrow(
        &mut self,
        escrow_id: Uuid,
        status: EscrowStatus,
    ) -> Result<GoodsEscrow, StoreError> {
        let escrow = self.escrow_mut(escrow_id)?;
        escrow.status = status;
        escrow.settled_at = Some(Utc::now());
        Ok(escrow.clone())
    }

    async fn insert_plan(
        &mut self,
        plan: NewInstallmentPlan,
    ) -> Result<InstallmentPlan, StoreError> {
        if self.working.plans.values().any(|p| p.order_id == plan.order_id) {
            return Err(StoreError::Constraint(format!(
                "installment plan already exists for order {}",
                plan.order_id
            )));
        }
        let id = Uuid::new_v4();
        let legs = plan
            .schedule
            .into_iter()
            .enumerate()
            .map(|(index, amount)| InstallmentLeg {
                plan_id: id,
                index: index as i32,
                amount,
                status: LegStatus::Unpaid,
                paid_at: None,
            })
            .collect();
        let created = InstallmentPlan {
            id,
            order_id: plan.order_id,
            mode: plan.mode,
            total_amount: plan.total_amount,
            paid_amount: BigDecimal::from(0),
            currency: plan.currency,
            status: PlanStatus::Active,
            legs,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.working.plans.insert(id, created.clone());
        Ok(created)
    }

    async fn plan_for_update(
        &mut self,
        plan_id: Uuid,
    ) -> Result<Option<InstallmentPlan>, StoreError> {
        Ok(self.working.plans.get(&plan_id).cloned())
    }

    async fn plan_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<InstallmentPlan>, StoreError> {
        Ok(self
            .working
            .plans
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn mark_leg_paid(
        &mut self,
        plan_id: Uuid,
        index: i32,
        amount: &BigDecimal,
    ) -> Result<InstallmentPlan, StoreError> {
        let plan = self.plan_mut(plan_id)?;
        let leg = plan
            .legs
            .iter_mut()
            .find(|leg| leg.index == index)
            .ok_or_else(|| StoreError::MissingRow(format!("leg {} of plan {}", index, plan_id)))?;
        leg.status = LegStatus::Paid;
        leg.paid_at = Some(Utc::now());
        plan.paid_amount = &plan.paid_amount + amount;
        Ok(plan.clone())
    }

    async fn complete_plan(&mut self, plan_id: Uuid) -> Result<InstallmentPlan, StoreError> {
        let plan = self.plan_mut(plan_id)?;
        plan.status = PlanStatus::Completed;
        plan.completed_at = Some(Utc::now());
        Ok(plan.clone())
    }

    async fn fee_rules(&mut self, applies_to: &str) -> Result<Vec<FeeRule>, StoreError> {
        Ok(self
            .working
            .fee_rules
            .iter()
            .filter(|r| r.applies_to == applies_to)
            .cloned()
            .collect())
    }

    async fn upsert_fee_rule(&mut self, rule: FeeRule) -> Result<(), StoreError> {
        self.working.fee_rules.retain(|r| r.code != rule.code);
        self.working.fee_rules.push(rule);
        Ok(())
    }

    async fn merchant_fee_overrides(
        &mut self,
        merchant_id: Uuid,
    ) -> Result<Vec<MerchantFeeOverride>, StoreError> {
        Ok(self
            .working
            .fee_overrides
            .iter()
            .filter(|o| o.merchant_id == merchant_id)
            .cloned()
            .collect())
    }

    async fn billing_entries_for(
        &mut self,
        transaction_id: &str,
    ) -> Result<Vec<BillingLedgerEntry>, StoreError> {
        Ok(self
            .working
            .billing
            .iter()
            .filter(|b| b.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn insert_billing_entry(
        &mut self,
        entry: NewBillingLedgerEntry,
    ) -> Result<Option<BillingLedgerEntry>, StoreError> {
        let exists = self.working.billing.iter().any(|b| {
            (b.transaction_id == entry.transaction_id && b.fee_code == entry.fee_code)
                || b.reference == entry.reference
        });
        if exists {
            return Ok(None);
        }
        let created = BillingLedgerEntry {
            id: Uuid::new_v4(),
            transaction_type: entry.transaction_type,
            transaction_id: entry.transaction_id,
            fee_code: entry.fee_code,
            direction: EntryDirection::Credit,
            amount: entry.amount,
            currency: entry.currency,
            payer_account: entry.payer_account,
            status: entry.status,
            reference: entry.reference,
            metadata: entry.metadata,
            created_at: Utc::now(),
        };
        self.working.billing.push(created.clone());
        Ok(Some(created))
    }

    async fn find_idempotency(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.working.idempotency.get(key).cloned())
    }

    async fn insert_idempotency(
        &mut self,
        record: NewIdempotencyRecord,
    ) -> Result<bool, StoreError> {
        if self.working.idempotency.contains_key(&record.key) {
            return Ok(false);
        }
        let stored = IdempotencyRecord {
            key: record.key.clone(),
            entity_id: record.entity_id,
            response: record.response,
            request_hash: record.request_hash,
            created_at: Utc::now(),
            expires_at: record.expires_at,
        };
        self.working.idempotency.insert(record.key, stored);
        Ok(true)
    }

    async fn purge_idempotency(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.working.idempotency.len();
        self.working.idempotency.retain(|_, r| !r.is_expired(now));
        Ok((before - self.working.idempotency.len()) as u64)
    }

    async fn user_role(&mut self, user_id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(self.working.roles.get(&user_id).copied())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnitOfWork {
            mut committed,
            working,
        } = *self;
        *committed = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn amount(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_uncommitted_work_is_discarded() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_wallet(NewWallet::platform("KES")).await.unwrap();
            // dropped without commit
        }

        let mut uow = store.begin().await.unwrap();
        assert!(uow
            .find_wallet(&WalletOwner::Platform, "KES")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        let wallet = uow.insert_wallet(NewWallet::user(user_id, "KES")).await.unwrap();
        uow.apply_ledger_entry(NewLedgerEntry::credit(
            wallet.id,
            amount("100.00"),
            "KES",
            "topup-1".to_string(),
            json!({}),
        ))
        .await
        .unwrap();
        uow.commit().await.unwrap();

        let stored = store.wallet(wallet.id).await.unwrap();
        assert_eq!(stored.balance, amount("100.00"));
        assert_eq!(store.ledger_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_wallet_returns_existing() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        let first = uow.insert_wallet(NewWallet::user(user_id, "KES")).await.unwrap();
        let second = uow.insert_wallet(NewWallet::user(user_id, "KES")).await.unwrap();
        let other_currency = uow.insert_wallet(NewWallet::user(user_id, "UGX")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other_currency.id);
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let wallet = uow.insert_wallet(NewWallet::platform("KES")).await.unwrap();

        let entry = NewLedgerEntry::credit(
            wallet.id,
            amount("5.00"),
            "KES",
            "fee-1".to_string(),
            json!({}),
        );
        uow.apply_ledger_entry(entry.clone()).await.unwrap();
        let err = uow.apply_ledger_entry(entry).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateReference(r) if r == "fee-1"));
    }

    #[tokio::test]
    async fn test_billing_entry_unique_per_transaction_and_code() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let entry = NewBillingLedgerEntry {
            transaction_type: "MERCHANT_PAYMENT".to_string(),
            transaction_id: "order-1".to_string(),
            fee_code: "MDR_DEFAULT".to_string(),
            amount: amount("7.50"),
            currency: "KES".to_string(),
            payer_account: crate::models::FeePayer::Merchant,
            status: crate::models::BillingStatus::Posted,
            reference: "fee-merchant_payment-order-1-MDR_DEFAULT".to_string(),
            metadata: json!({}),
        };

        assert!(uow.insert_billing_entry(entry.clone()).await.unwrap().is_some());
        assert!(uow.insert_billing_entry(entry.clone()).await.unwrap().is_none());

        // Same reference under a different pair is refused too, as the
        // reference column is unique.
        let other_pair = NewBillingLedgerEntry {
            transaction_id: "order-2".to_string(),
            fee_code: "CHECKOUT_CUSTOMER_FEE".to_string(),
            ..entry
        };
        assert!(uow.insert_billing_entry(other_pair).await.unwrap().is_none());
        uow.commit().await.unwrap();
        assert_eq!(store.billing_entries().await.len(), 1);
    }
}
