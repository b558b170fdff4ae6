//! Database models for the Bridge ledger.

pub mod billing_ledger;
pub mod fee_rule;
pub mod goods_escrow;
pub mod idempotency_record;
pub mod installment_plan;
pub mod ledger_entry;
pub mod order;
pub mod user_role;
pub mod wallet;

pub use billing_ledger::{BillingLedgerEntry, BillingStatus, NewBillingLedgerEntry};
pub use fee_rule::{
    FeeCategory, FeePayer, FeeRule, FeeRuleStatus, FeeTier, FeeType, MerchantFeeOverride,
};
pub use goods_escrow::{EscrowStatus, GoodsEscrow, NewGoodsEscrow};
pub use idempotency_record::{IdempotencyRecord, NewIdempotencyRecord};
pub use installment_plan::{
    InstallmentLeg, InstallmentPlan, LegStatus, NewInstallmentPlan, PlanMode, PlanStatus,
};
pub use ledger_entry::{EntryDirection, LedgerEntry, NewLedgerEntry};
pub use order::{NewOrder, Order, OrderStatus, PaymentMode};
pub use user_role::Role;
pub use wallet::{NewWallet, Wallet, WalletKind, WalletOwner};
