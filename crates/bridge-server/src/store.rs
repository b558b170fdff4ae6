//! Persistence boundary for the ledger core.
//!
//! Every money movement runs inside one [`UnitOfWork`]: rows read before a
//! mutation are locked, and nothing becomes visible until [`UnitOfWork::commit`].
//! Dropping a unit of work without committing discards all of its writes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BillingLedgerEntry, EscrowStatus, FeeRule, GoodsEscrow, IdempotencyRecord, InstallmentPlan,
    LedgerEntry, MerchantFeeOverride, NewBillingLedgerEntry, NewGoodsEscrow,
    NewIdempotencyRecord, NewInstallmentPlan, NewLedgerEntry, NewOrder, NewWallet, Order,
    OrderStatus, Role, Wallet, WalletOwner,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors raised by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate ledger reference: {0}")]
    DuplicateReference(String),

    #[error("Row not found: {0}")]
    MissingRow(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Statement timed out")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Entry point to the backing store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// Reads and writes executed atomically.
#[async_trait]
pub trait UnitOfWork: Send {
    // ----- wallets -----

    /// Locks and returns the wallet for `owner` in `currency`.
    async fn find_wallet(
        &mut self,
        owner: &WalletOwner,
        currency: &str,
    ) -> Result<Option<Wallet>, StoreError>;

    /// Creates the wallet, or returns the existing one if a concurrent
    /// writer created it first.
    async fn insert_wallet(&mut self, wallet: NewWallet) -> Result<Wallet, StoreError>;

    async fn wallet_for_update(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>, StoreError>;

    /// Appends the entry and moves the wallet balance by its signed amount.
    async fn apply_ledger_entry(&mut self, entry: NewLedgerEntry)
        -> Result<LedgerEntry, StoreError>;

    /// Moves the wallet hold by `delta` (may be negative).
    async fn adjust_hold(&mut self, wallet_id: Uuid, delta: &BigDecimal)
        -> Result<Wallet, StoreError>;

    /// Newest first.
    async fn recent_ledger_entries(
        &mut self,
        wallet_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    // ----- orders -----

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError>;

    async fn order_for_update(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, StoreError>;

    // ----- goods escrow -----

    async fn escrow_for_update(&mut self, order_id: Uuid)
        -> Result<Option<GoodsEscrow>, StoreError>;

    async fn insert_escrow(&mut self, escrow: NewGoodsEscrow) -> Result<GoodsEscrow, StoreError>;

    async fn add_escrow_hold(
        &mut self,
        escrow_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<GoodsEscrow, StoreError>;

    async fn settle_escrow(
        &mut self,
        escrow_id: Uuid,
        status: EscrowStatus,
    ) -> Result<GoodsEscrow, StoreError>;

    // ----- installment plans -----

    async fn insert_plan(&mut self, plan: NewInstallmentPlan)
        -> Result<InstallmentPlan, StoreError>;

    /// Locks the plan row; legs are returned ordered by index.
    async fn plan_for_update(&mut self, plan_id: Uuid)
        -> Result<Option<InstallmentPlan>, StoreError>;

    async fn plan_for_order(&mut self, order_id: Uuid)
        -> Result<Option<InstallmentPlan>, StoreError>;

    /// Marks the leg paid and adds `amount` to the plan's paid total.
    async fn mark_leg_paid(
        &mut self,
        plan_id: Uuid,
        index: i32,
        amount: &BigDecimal,
    ) -> Result<InstallmentPlan, StoreError>;

    async fn complete_plan(&mut self, plan_id: Uuid) -> Result<InstallmentPlan, StoreError>;

    // ----- billing -----

    /// Every rule for the category, regardless of status or window.
    async fn fee_rules(&mut self, applies_to: &str) -> Result<Vec<FeeRule>, StoreError>;

    async fn upsert_fee_rule(&mut self, rule: FeeRule) -> Result<(), StoreError>;

    async fn merchant_fee_overrides(
        &mut self,
        merchant_id: Uuid,
    ) -> Result<Vec<MerchantFeeOverride>, StoreError>;

    async fn billing_entries_for(
        &mut self,
        transaction_id: &str,
    ) -> Result<Vec<BillingLedgerEntry>, StoreError>;

    /// Returns `None` when `(transaction_id, fee_code)` or the reference is
    /// already recorded.
    async fn insert_billing_entry(
        &mut self,
        entry: NewBillingLedgerEntry,
    ) -> Result<Option<BillingLedgerEntry>, StoreError>;

    // ----- idempotency -----

    async fn find_idempotency(&mut self, key: &str)
        -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Insert-if-absent. Returns false when the key already existed.
    async fn insert_idempotency(&mut self, record: NewIdempotencyRecord)
        -> Result<bool, StoreError>;

    /// Deletes records that expired at or before `now`.
    async fn purge_idempotency(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    // ----- roles -----

    async fn user_role(&mut self, user_id: Uuid) -> Result<Option<Role>, StoreError>;

    /// Makes every write of this unit visible.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
