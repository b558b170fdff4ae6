//! PostgreSQL store. One unit of work is one database transaction.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LedgerStore, StoreError, UnitOfWork};
use crate::models::{
    BillingLedgerEntry, EntryDirection, EscrowStatus, FeeRule, GoodsEscrow, IdempotencyRecord,
    InstallmentLeg, InstallmentPlan, LedgerEntry, LegStatus, MerchantFeeOverride,
    NewBillingLedgerEntry, NewGoodsEscrow, NewIdempotencyRecord, NewInstallmentPlan,
    NewLedgerEntry, NewOrder, NewWallet, Order, OrderStatus, PlanStatus, Role, Wallet,
    WalletOwner,
};

const WALLET_COLUMNS: &str =
    "id, kind, user_id, order_id, currency, balance, hold, created_at, updated_at";
const LEDGER_COLUMNS: &str = "id, wallet_id, counterparty_wallet_id, direction, amount, currency, reference, narration, metadata, balance_after, created_at";
const ORDER_COLUMNS: &str =
    "id, customer_id, merchant_id, amount, currency, payment_mode, status, created_at, updated_at";
const ESCROW_COLUMNS: &str = "id, order_id, hold_amount, currency, escrow_wallet_id, release_condition, status, created_at, settled_at";
const PLAN_COLUMNS: &str =
    "id, order_id, mode, total_amount, paid_amount, currency, status, created_at, completed_at";
const FEE_RULE_COLUMNS: &str = "code, name, fee_type, applies_to, payer, rate, amount, tiers, funding_source, status, effective_start, effective_end";
const BILLING_COLUMNS: &str = "id, transaction_type, transaction_id, fee_code, direction, amount, currency, payer_account, status, reference, metadata, created_at";

/// SQLSTATE raised when `statement_timeout` cancels a query.
const QUERY_CANCELED: &str = "57014";

fn db_error(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.code().as_deref() == Some(QUERY_CANCELED) {
            return StoreError::Timeout;
        }
    }
    StoreError::Database(e)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map_or(false, |db| db.is_unique_violation())
}

/// Store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }

    /// Opens a pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        statement_timeout_ms: u64,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, statement_timeout_ms))
    }

    /// Runs all pending migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Scoped to this transaction only.
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(self.statement_timeout_ms.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    async fn load_legs(&mut self, plan_id: Uuid) -> Result<Vec<InstallmentLeg>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT plan_id, leg_index, amount, status, paid_at
            FROM installment_legs
            WHERE plan_id = $1
            ORDER BY leg_index
            "#,
        )
        .bind(plan_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn require_plan(&mut self, plan_id: Uuid) -> Result<InstallmentPlan, StoreError> {
        self.plan_for_update(plan_id)
            .await?
            .ok_or_else(|| StoreError::MissingRow(format!("installment plan {}", plan_id)))
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_wallet(
        &mut self,
        owner: &WalletOwner,
        currency: &str,
    ) -> Result<Option<Wallet>, StoreError> {
        let key = owner.to_new_wallet(currency);
        sqlx::query_as(&format!(
            r#"
            SELECT {WALLET_COLUMNS}
            FROM wallets
            WHERE kind = $1
              AND user_id IS NOT DISTINCT FROM $2
              AND order_id IS NOT DISTINCT FROM $3
              AND currency = $4
            FOR UPDATE
            "#
        ))
        .bind(key.kind)
        .bind(key.user_id)
        .bind(key.order_id)
        .bind(&key.currency)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_wallet(&mut self, wallet: NewWallet) -> Result<Wallet, StoreError> {
        let inserted: Option<Wallet> = sqlx::query_as(&format!(
            r#"
            INSERT INTO wallets (id, kind, user_id, order_id, currency, balance, hold)
            VALUES ($1, $2, $3, $4, $5, 0, 0)
            ON CONFLICT DO NOTHING
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(wallet.kind)
        .bind(wallet.user_id)
        .bind(wallet.order_id)
        .bind(&wallet.currency)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if let Some(wallet) = inserted {
            return Ok(wallet);
        }

        // Lost the race to a concurrent creator; the row is now committed.
        let owner = match (wallet.user_id, wallet.order_id) {
            (Some(user_id), _) => WalletOwner::User(user_id),
            (_, Some(order_id)) => WalletOwner::Escrow(order_id),
            _ if wallet.kind == crate::models::WalletKind::Platform => WalletOwner::Platform,
            _ => WalletOwner::Settlement,
        };
        self.find_wallet(&owner, &wallet.currency)
            .await?
            .ok_or_else(|| StoreError::MissingRow(format!("{:?} wallet", owner)))
    }

    async fn wallet_for_update(&mut self, wallet_id: Uuid) -> Result<Option<Wallet>, StoreError> {
        sqlx::query_as(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1 FOR UPDATE"
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn apply_ledger_entry(
        &mut self,
        entry: NewLedgerEntry,
    ) -> Result<LedgerEntry, StoreError> {
        let balance_after: Option<BigDecimal> = sqlx::query_scalar(
            r#"
            UPDATE wallets
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING balance
            "#,
        )
        .bind(entry.wallet_id)
        .bind(entry.signed_amount())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let balance_after = balance_after
            .ok_or_else(|| StoreError::MissingRow(format!("wallet {}", entry.wallet_id)))?;

        sqlx::query_as(&format!(
            r#"
            INSERT INTO ledger_entries (id, wallet_id, counterparty_wallet_id, direction, amount, currency, reference, narration, metadata, balance_after)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(entry.wallet_id)
        .bind(entry.counterparty_wallet_id)
        .bind(entry.direction)
        .bind(&entry.amount)
        .bind(&entry.currency)
        .bind(&entry.reference)
        .bind(&entry.narration)
        .bind(&entry.metadata)
        .bind(&balance_after)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateReference(entry.reference.clone())
            } else {
                db_error(e)
            }
        })
    }

    async fn adjust_hold(
        &mut self,
        wallet_id: Uuid,
        delta: &BigDecimal,
    ) -> Result<Wallet, StoreError> {
        sqlx::query_as(&format!(
            r#"
            UPDATE wallets
            SET hold = hold + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(wallet_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::MissingRow(format!("wallet {}", wallet_id)))
    }

    async fn recent_ledger_entries(
        &mut self,
        wallet_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        sqlx::query_as(&format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM ledger_entries
            WHERE wallet_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(wallet_id)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        sqlx::query_as(&format!(
            r#"
            INSERT INTO orders (id, customer_id, merchant_id, amount, currency, payment_mode, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(order.customer_id)
        .bind(order.merchant_id)
        .bind(&order.amount)
        .bind(&order.currency)
        .bind(order.payment_mode)
        .bind(OrderStatus::Pending)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn order_for_update(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        sqlx::query_as(&format!(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(status)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::MissingRow(format!("order {}", order_id)))
    }

    async fn escrow_for_update(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<GoodsEscrow>, StoreError> {
        sqlx::query_as(&format!(
            "SELECT {ESCROW_COLUMNS} FROM goods_escrows WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_escrow(&mut self, escrow: NewGoodsEscrow) -> Result<GoodsEscrow, StoreError> {
        sqlx::query_as(&format!(
            r#"
            INSERT INTO goods_escrows (id, order_id, hold_amount, currency, escrow_wallet_id, release_condition, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ESCROW_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(escrow.order_id)
        .bind(&escrow.hold_amount)
        .bind(&escrow.currency)
        .bind(escrow.escrow_wallet_id)
        .bind(&escrow.release_condition)
        .bind(EscrowStatus::Held)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Constraint(format!(
                    "goods escrow already exists for order {}",
                    escrow.order_id
                ))
            } else {
                db_error(e)
            }
        })
    }

    async fn add_escrow_hold(
        &mut self,
        escrow_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<GoodsEscrow, StoreError> {
        sqlx::query_as(&format!(
            r#"
            UPDATE goods_escrows
            SET hold_amount = hold_amount + $2
            WHERE id = $1
            RETURNING {ESCROW_COLUMNS}
            "#
        ))
        .bind(escrow_id)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::MissingRow(format!("goods escrow {}", escrow_id)))
    }

    async fn settle_escrow(
        &mut self,
        escrow_id: Uuid,
        status: EscrowStatus,
    ) -> Result<GoodsEscrow, StoreError> {
        sqlx::query_as(&format!(
            r#"
            UPDATE goods_escrows
            SET status = $2, settled_at = NOW()
            WHERE id = $1
            RETURNING {ESCROW_COLUMNS}
            "#
        ))
        .bind(escrow_id)
        .bind(status)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::MissingRow(format!("goods escrow {}", escrow_id)))
    }

    async fn insert_plan(
        &mut self,
        plan: NewInstallmentPlan,
    ) -> Result<InstallmentPlan, StoreError> {
        let plan_id = Uuid::new_v4();
        let mut created: InstallmentPlan = sqlx::query_as(&format!(
            r#"
            INSERT INTO installment_plans (id, order_id, mode, total_amount, paid_amount, currency, status)
            VALUES ($1, $2, $3, $4, 0, $5, $6)
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(plan_id)
        .bind(plan.order_id)
        .bind(plan.mode)
        .bind(&plan.total_amount)
        .bind(&plan.currency)
        .bind(PlanStatus::Active)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Constraint(format!(
                    "installment plan already exists for order {}",
                    plan.order_id
                ))
            } else {
                db_error(e)
            }
        })?;

        for (index, amount) in plan.schedule.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO installment_legs (plan_id, leg_index, amount, status)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(plan_id)
            .bind(index as i32)
            .bind(amount)
            .bind(LegStatus::Unpaid)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }

        created.legs = self.load_legs(plan_id).await?;
        Ok(created)
    }

    async fn plan_for_update(
        &mut self,
        plan_id: Uuid,
    ) -> Result<Option<InstallmentPlan>, StoreError> {
        let plan: Option<InstallmentPlan> = sqlx::query_as(&format!(
            "SELECT {PLAN_COLUMNS} FROM installment_plans WHERE id = $1 FOR UPDATE"
        ))
        .bind(plan_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        match plan {
            Some(mut plan) => {
                plan.legs = self.load_legs(plan.id).await?;
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }

    async fn plan_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<InstallmentPlan>, StoreError> {
        let plan_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM installment_plans WHERE order_id = $1")
                .bind(order_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(db_error)?;

        match plan_id {
            Some(plan_id) => self.plan_for_update(plan_id).await,
            None => Ok(None),
        }
    }

    async fn mark_leg_paid(
        &mut self,
        plan_id: Uuid,
        index: i32,
        amount: &BigDecimal,
    ) -> Result<InstallmentPlan, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE installment_legs
            SET status = $3, paid_at = NOW()
            WHERE plan_id = $1 AND leg_index = $2
            "#,
        )
        .bind(plan_id)
        .bind(index)
        .bind(LegStatus::Paid)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::MissingRow(format!(
                "leg {} of plan {}",
                index, plan_id
            )));
        }

        sqlx::query("UPDATE installment_plans SET paid_amount = paid_amount + $2 WHERE id = $1")
            .bind(plan_id)
            .bind(amount)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        self.require_plan(plan_id).await
    }

    async fn complete_plan(&mut self, plan_id: Uuid) -> Result<InstallmentPlan, StoreError> {
        sqlx::query(
            "UPDATE installment_plans SET status = $2, completed_at = NOW() WHERE id = $1",
        )
        .bind(plan_id)
        .bind(PlanStatus::Completed)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        self.require_plan(plan_id).await
    }

    async fn fee_rules(&mut self, applies_to: &str) -> Result<Vec<FeeRule>, StoreError> {
        sqlx::query_as(&format!(
            "SELECT {FEE_RULE_COLUMNS} FROM fee_rules WHERE applies_to = $1 ORDER BY code"
        ))
        .bind(applies_to)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn upsert_fee_rule(&mut self, rule: FeeRule) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fee_rules (code, name, fee_type, applies_to, payer, rate, amount, tiers, funding_source, status, effective_start, effective_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (code) DO UPDATE SET
                name = EXCLUDED.name,
                fee_type = EXCLUDED.fee_type,
                applies_to = EXCLUDED.applies_to,
                payer = EXCLUDED.payer,
                rate = EXCLUDED.rate,
                amount = EXCLUDED.amount,
                tiers = EXCLUDED.tiers,
                funding_source = EXCLUDED.funding_source,
                status = EXCLUDED.status,
                effective_start = EXCLUDED.effective_start,
                effective_end = EXCLUDED.effective_end
            "#,
        )
        .bind(&rule.code)
        .bind(&rule.name)
        .bind(rule.fee_type)
        .bind(&rule.applies_to)
        .bind(rule.payer)
        .bind(&rule.rate)
        .bind(&rule.amount)
        .bind(&rule.tiers)
        .bind(&rule.funding_source)
        .bind(rule.status)
        .bind(rule.effective_start)
        .bind(rule.effective_end)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn merchant_fee_overrides(
        &mut self,
        merchant_id: Uuid,
    ) -> Result<Vec<MerchantFeeOverride>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT merchant_id, fee_code, fee_type, rate, amount, tiers, active
            FROM merchant_fee_overrides
            WHERE merchant_id = $1
            "#,
        )
        .bind(merchant_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn billing_entries_for(
        &mut self,
        transaction_id: &str,
    ) -> Result<Vec<BillingLedgerEntry>, StoreError> {
        sqlx::query_as(&format!(
            r#"
            SELECT {BILLING_COLUMNS}
            FROM billing_ledger
            WHERE transaction_id = $1
            ORDER BY created_at, fee_code
            "#
        ))
        .bind(transaction_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_billing_entry(
        &mut self,
        entry: NewBillingLedgerEntry,
    ) -> Result<Option<BillingLedgerEntry>, StoreError> {
        sqlx::query_as(&format!(
            r#"
            INSERT INTO billing_ledger (id, transaction_type, transaction_id, fee_code, direction, amount, currency, payer_account, status, reference, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT DO NOTHING
            RETURNING {BILLING_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&entry.transaction_type)
        .bind(&entry.transaction_id)
        .bind(&entry.fee_code)
        .bind(EntryDirection::Credit)
        .bind(&entry.amount)
        .bind(&entry.currency)
        .bind(entry.payer_account)
        .bind(entry.status)
        .bind(&entry.reference)
        .bind(&entry.metadata)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn find_idempotency(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT key, entity_id, response, request_hash, created_at, expires_at
            FROM idempotency_records
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_idempotency(
        &mut self,
        record: NewIdempotencyRecord,
    ) -> Result<bool, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records (key, entity_id, response, request_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&record.key)
        .bind(&record.entity_id)
        .bind(&record.response)
        .bind(&record.request_hash)
        .bind(record.expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn purge_idempotency(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let deleted = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?
            .rows_affected();
        Ok(deleted)
    }

    async fn user_role(&mut self, user_id: Uuid) -> Result<Option<Role>, StoreError> {
        sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_error)
    }
}
