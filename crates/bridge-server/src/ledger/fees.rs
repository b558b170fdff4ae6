//! Fee engine: prices transactions from the fee catalog and posts the
//! resulting billing rows and platform revenue movements.

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::types::Json;
use std::str::FromStr;
use uuid::Uuid;

use super::posting::{self, Transfer};
use super::{wallets, LedgerError};
use crate::models::{
    BillingLedgerEntry, BillingStatus, FeeCategory, FeePayer, FeeRule, FeeRuleStatus, FeeTier,
    FeeType, MerchantFeeOverride, NewBillingLedgerEntry,
};
use crate::store::UnitOfWork;

/// Longest readable billing reference. Longer ones switch to a digest of
/// the transaction id; fee legs append up to five more characters.
const MAX_REFERENCE_LEN: usize = 120;

/// Longest transaction id accepted by [`apply_fees`].
pub const MAX_TRANSACTION_ID_LEN: usize = 120;

/// Input to fee calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuery {
    pub applies_to: String,
    pub amount: BigDecimal,
    pub currency: String,
    #[serde(default)]
    pub merchant_id: Option<Uuid>,
    #[serde(default)]
    pub funding_plan: Option<String>,
}

/// One priced fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeLine {
    pub fee_code: String,
    pub name: String,
    pub payer: FeePayer,
    pub amount: BigDecimal,
    pub currency: String,
}

/// The fee set for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub items: Vec<FeeLine>,
    pub total: BigDecimal,
    pub currency: String,
}

impl FeeBreakdown {
    pub fn empty(currency: &str) -> Self {
        Self {
            items: Vec::new(),
            total: BigDecimal::zero(),
            currency: currency.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of the lines borne by `payer`.
    pub fn total_for(&self, payer: FeePayer) -> BigDecimal {
        self.items
            .iter()
            .filter(|line| line.payer == payer)
            .fold(BigDecimal::zero(), |acc, line| acc + &line.amount)
    }
}

/// Input to [`apply_fees`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyFeesRequest {
    pub transaction_type: String,
    pub transaction_id: String,
    pub base_amount: BigDecimal,
    pub currency: String,
    #[serde(default)]
    pub merchant_id: Option<Uuid>,
    #[serde(default)]
    pub funding_plan: Option<String>,
    /// Debited for customer-paid lines when present.
    #[serde(default)]
    pub customer_wallet_id: Option<Uuid>,
    /// Debited for merchant-paid lines when present.
    #[serde(default)]
    pub merchant_wallet_id: Option<Uuid>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ApplyFeesRequest {
    pub fn new(
        category: FeeCategory,
        transaction_id: impl Into<String>,
        base_amount: BigDecimal,
        currency: &str,
    ) -> Self {
        Self {
            transaction_type: category.as_str().to_string(),
            transaction_id: transaction_id.into(),
            base_amount,
            currency: currency.to_string(),
            merchant_id: None,
            funding_plan: None,
            customer_wallet_id: None,
            merchant_wallet_id: None,
            idempotency_key: None,
        }
    }

    pub fn merchant(mut self, merchant_id: Uuid) -> Self {
        self.merchant_id = Some(merchant_id);
        self
    }

    pub fn customer_wallet(mut self, wallet_id: Uuid) -> Self {
        self.customer_wallet_id = Some(wallet_id);
        self
    }

    pub fn merchant_wallet(mut self, wallet_id: Uuid) -> Self {
        self.merchant_wallet_id = Some(wallet_id);
        self
    }

    pub fn funding_plan(mut self, funding_plan: Option<String>) -> Self {
        self.funding_plan = funding_plan;
        self
    }

    /// The calculation input this request prices with.
    pub fn query(&self) -> FeeQuery {
        FeeQuery {
            applies_to: self.transaction_type.clone(),
            amount: self.base_amount.clone(),
            currency: self.currency.clone(),
            merchant_id: self.merchant_id,
            funding_plan: self.funding_plan.clone(),
        }
    }
}

/// A billing row as reported back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFee {
    pub fee_code: String,
    pub payer: FeePayer,
    pub amount: BigDecimal,
    pub currency: String,
    pub reference: String,
    pub status: BillingStatus,
}

impl From<BillingLedgerEntry> for AppliedFee {
    fn from(entry: BillingLedgerEntry) -> Self {
        Self {
            fee_code: entry.fee_code,
            payer: entry.payer_account,
            amount: entry.amount,
            currency: entry.currency,
            reference: entry.reference,
            status: entry.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFeesResult {
    pub transaction_id: String,
    pub applied: Vec<AppliedFee>,
    pub total: BigDecimal,
    pub currency: String,
}

/// Billing reference for one fee line of one transaction.
///
/// Distinct `(transaction_id, fee_code)` pairs always map to distinct
/// references.
pub fn fee_reference(transaction_type: &str, transaction_id: &str, fee_code: &str) -> String {
    let transaction_type = transaction_type.to_lowercase();
    let reference = format!("fee-{}-{}-{}", transaction_type, transaction_id, fee_code);
    if reference.len() <= MAX_REFERENCE_LEN {
        return reference;
    }
    let digest = hex::encode(Sha256::digest(transaction_id.as_bytes()));
    format!("fee-{}-h{}-{}", transaction_type, &digest[..32], fee_code)
}

/// Rejects transaction ids the billing ledger cannot store.
pub fn validate_transaction_id(transaction_id: &str) -> Result<(), LedgerError> {
    if transaction_id.trim().is_empty() || transaction_id.len() > MAX_TRANSACTION_ID_LEN {
        return Err(LedgerError::validation(
            "transactionId",
            format!("must be 1 to {} characters", MAX_TRANSACTION_ID_LEN),
        ));
    }
    Ok(())
}

fn round_money(value: BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// Rate for `amount` from tiers: the first band (ascending `upto`) whose
/// ceiling covers the amount, else the last band, else `fallback`.
fn tier_rate(tiers: &[FeeTier], amount: &BigDecimal, fallback: Option<&BigDecimal>) -> BigDecimal {
    let mut sorted: Vec<&FeeTier> = tiers.iter().collect();
    sorted.sort_by(|a, b| a.upto.cmp(&b.upto));

    let mut rate = fallback.cloned().unwrap_or_else(BigDecimal::zero);
    for tier in sorted {
        rate = tier.rate.clone();
        if amount <= &tier.upto {
            break;
        }
    }
    rate
}

/// Prices one rule, with the merchant override (if any) replacing the
/// fields it sets.
fn price(
    rule: &FeeRule,
    fee_override: Option<&MerchantFeeOverride>,
    amount: &BigDecimal,
) -> BigDecimal {
    let fee_type = fee_override
        .and_then(|o| o.fee_type)
        .unwrap_or(rule.fee_type);
    let rate = fee_override
        .and_then(|o| o.rate.as_ref())
        .or(rule.rate.as_ref());
    let flat = fee_override
        .and_then(|o| o.amount.as_ref())
        .or(rule.amount.as_ref());
    let tiers: &[FeeTier] = match fee_override.and_then(|o| o.tiers.as_ref()) {
        Some(Json(tiers)) => tiers,
        None => &rule.tiers.0,
    };

    match fee_type {
        FeeType::Flat => flat.cloned().map(round_money).unwrap_or_else(BigDecimal::zero),
        FeeType::Percentage => rate
            .map(|rate| round_money(amount * rate))
            .unwrap_or_else(BigDecimal::zero),
        FeeType::Tiered => round_money(amount * tier_rate(tiers, amount, rate)),
    }
}

/// Pure fee computation over already-loaded rules.
///
/// Rules are filtered to the query's category, effective window and funding
/// plan. Zero-valued lines are dropped.
pub fn compute_fees(
    rules: &[FeeRule],
    overrides: &[MerchantFeeOverride],
    query: &FeeQuery,
    now: DateTime<Utc>,
) -> FeeBreakdown {
    let mut breakdown = FeeBreakdown::empty(&query.currency);

    for rule in rules {
        if rule.applies_to != query.applies_to
            || !rule.is_effective(now)
            || !rule.matches_funding(query.funding_plan.as_deref())
        {
            continue;
        }

        let fee_override = overrides.iter().find(|o| {
            o.active && o.fee_code == rule.code && Some(o.merchant_id) == query.merchant_id
        });
        let amount = price(rule, fee_override, &query.amount);
        if amount <= BigDecimal::zero() {
            continue;
        }

        breakdown.total += &amount;
        breakdown.items.push(FeeLine {
            fee_code: rule.code.clone(),
            name: rule.name.clone(),
            payer: rule.payer,
            amount,
            currency: query.currency.clone(),
        });
    }

    breakdown
}

/// Loads the catalog for the query's category and prices it.
///
/// Unknown categories price to an empty breakdown.
pub async fn calculate_fees(
    uow: &mut dyn UnitOfWork,
    query: &FeeQuery,
) -> Result<FeeBreakdown, LedgerError> {
    if FeeCategory::from_str(&query.applies_to).is_err() {
        tracing::warn!(applies_to = %query.applies_to, "Unknown fee category, no fees applied");
        return Ok(FeeBreakdown::empty(&query.currency));
    }

    let rules = uow.fee_rules(&query.applies_to).await?;
    let overrides = match query.merchant_id {
        Some(merchant_id) => uow.merchant_fee_overrides(merchant_id).await?,
        None => Vec::new(),
    };

    Ok(compute_fees(&rules, &overrides, query, Utc::now()))
}

/// Prices the transaction and records one billing row per fee line.
///
/// A `(transaction_id, fee_code)` pair is recorded at most once: repeated
/// calls return the rows posted the first time and move no funds.
pub async fn apply_fees(
    uow: &mut dyn UnitOfWork,
    request: &ApplyFeesRequest,
) -> Result<AppliedFeesResult, LedgerError> {
    let breakdown = calculate_fees(uow, &request.query()).await?;
    let mut result = AppliedFeesResult {
        transaction_id: request.transaction_id.clone(),
        applied: Vec::with_capacity(breakdown.items.len()),
        total: breakdown.total.clone(),
        currency: request.currency.clone(),
    };
    if breakdown.is_empty() {
        return Ok(result);
    }

    let platform = wallets::get_or_create_platform_wallet(uow, &request.currency).await?;

    for line in breakdown.items {
        let reference = fee_reference(
            &request.transaction_type,
            &request.transaction_id,
            &line.fee_code,
        );
        let payer_wallet = match line.payer {
            FeePayer::Customer => request.customer_wallet_id.map(|id| (id, "cust")),
            FeePayer::Merchant => request.merchant_wallet_id.map(|id| (id, "mrc")),
            FeePayer::Platform => None,
        };
        let status = if payer_wallet.is_some() || line.payer == FeePayer::Platform {
            BillingStatus::Posted
        } else {
            BillingStatus::Pending
        };

        let inserted = uow
            .insert_billing_entry(NewBillingLedgerEntry {
                transaction_type: request.transaction_type.clone(),
                transaction_id: request.transaction_id.clone(),
                fee_code: line.fee_code.clone(),
                amount: line.amount.clone(),
                currency: request.currency.clone(),
                payer_account: line.payer,
                status,
                reference: reference.clone(),
                metadata: json!({
                    "baseAmount": request.base_amount,
                    "merchantId": request.merchant_id,
                    "fundingPlan": request.funding_plan,
                }),
            })
            .await?;

        let entry = match inserted {
            Some(entry) => entry,
            None => {
                tracing::warn!(
                    transaction_id = %request.transaction_id,
                    fee_code = %line.fee_code,
                    "Fee already applied, returning existing billing row"
                );
                let existing = uow
                    .billing_entries_for(&request.transaction_id)
                    .await?
                    .into_iter()
                    .find(|e| e.fee_code == line.fee_code)
                    .ok_or_else(|| {
                        LedgerError::Conflict(format!("billing reference {} in use", reference))
                    })?;
                result.applied.push(existing.into());
                continue;
            }
        };

        if let Some((wallet_id, leg)) = payer_wallet {
            posting::ensure_funds(uow, wallet_id, &line.amount).await?;
            posting::transfer(
                uow,
                Transfer {
                    from_wallet: wallet_id,
                    to_wallet: platform.id,
                    amount: line.amount.clone(),
                    currency: request.currency.clone(),
                    debit_reference: format!("{}-{}", reference, leg),
                    credit_reference: format!("{}-plat", reference),
                    narration: format!("Fee {}", line.fee_code),
                    metadata: json!({ "billingRef": reference }),
                },
            )
            .await?;
        }

        tracing::info!(
            transaction_id = %request.transaction_id,
            fee_code = %entry.fee_code,
            amount = %entry.amount,
            payer = ?entry.payer_account,
            status = ?entry.status,
            "Fee applied"
        );
        result.applied.push(entry.into());
    }

    Ok(result)
}

#[allow(clippy::too_many_arguments)]
fn catalog_rule(
    code: &str,
    name: &str,
    fee_type: FeeType,
    category: FeeCategory,
    payer: FeePayer,
    value: &str,
    funding_source: Option<&str>,
    status: FeeRuleStatus,
) -> FeeRule {
    // Catalog literals below are well-formed decimals.
    let value = BigDecimal::from_str(value).unwrap_or_else(|_| BigDecimal::zero());
    let (rate, amount) = match fee_type {
        FeeType::Flat => (None, Some(value)),
        FeeType::Percentage | FeeType::Tiered => (Some(value), None),
    };
    FeeRule {
        code: code.to_string(),
        name: name.to_string(),
        fee_type,
        applies_to: category.as_str().to_string(),
        payer,
        rate,
        amount,
        tiers: Json(Vec::new()),
        funding_source: funding_source.map(str::to_string),
        status,
        effective_start: None,
        effective_end: None,
    }
}

/// The stock fee catalog. Rules that would double-charge alongside the
/// defaults ship inactive.
#[rustfmt::skip]
pub fn default_catalog() -> Vec<FeeRule> {
    use FeeCategory::*;
    use FeePayer::{Customer, Merchant};
    use FeeRuleStatus::{Active, Inactive};
    use FeeType::{Flat, Percentage};

    vec![
        catalog_rule("CHECKOUT_CUSTOMER_FEE", "Checkout Convenience Fee (Customer)", Percentage, MerchantPayment, Customer, "0.01", None, Active),
        catalog_rule("MDR_DEFAULT", "Merchant Discount Rate (Default)", Percentage, MerchantPayment, Merchant, "0.015", None, Active),
        catalog_rule("MDR_WALLET", "MDR (Bridge Wallet)", Percentage, MerchantPayment, Merchant, "0.01", Some("BRIDGE_WALLET"), Active),
        catalog_rule("MDR_MPESA", "MDR (M-Pesa)", Percentage, MerchantPayment, Merchant, "0.015", Some("MPESA"), Inactive),
        catalog_rule("MDR_BANK", "MDR (Bank/Card)", Percentage, MerchantPayment, Merchant, "0.012", Some("BANK"), Inactive),
        catalog_rule("TOPUP_FEE_MPESA", "Top-up Convenience (M-Pesa)", Percentage, Topup, Customer, "0.01", Some("MPESA"), Active),
        catalog_rule("TOPUP_FEE_BANK", "Top-up Convenience (Bank)", Percentage, Topup, Customer, "0.008", Some("BANK"), Active),
        catalog_rule("TOPUP_FEE_CARD", "Top-up Convenience (Card)", Percentage, Topup, Customer, "0.015", Some("CARD"), Active),
        catalog_rule("WITHDRAW_FEE", "Withdrawal Fee", Flat, Withdrawal, Customer, "30", None, Active),
        catalog_rule("PROJECT_PLATFORM_FEE", "Project Platform Fee", Percentage, Project, Merchant, "0.025", None, Inactive),
        catalog_rule("SCHEDULED_EXEC_FEE", "Scheduled Payment Execution Fee", Flat, Scheduled, Customer, "10", None, Inactive),
        catalog_rule("FX_SPREAD", "FX Conversion Spread", Percentage, Fx, Customer, "0.015", None, Inactive),
    ]
}

/// Upserts every rule of [`default_catalog`].
pub async fn seed_default_catalog(uow: &mut dyn UnitOfWork) -> Result<usize, LedgerError> {
    let catalog = default_catalog();
    let count = catalog.len();
    for rule in catalog {
        uow.upsert_fee_rule(rule).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn query(applies_to: &str, amount: &str) -> FeeQuery {
        FeeQuery {
            applies_to: applies_to.to_string(),
            amount: dec(amount),
            currency: "KES".to_string(),
            merchant_id: None,
            funding_plan: None,
        }
    }

    fn percentage(code: &str, payer: FeePayer, rate: &str) -> FeeRule {
        catalog_rule(
            code,
            code,
            FeeType::Percentage,
            FeeCategory::MerchantPayment,
            payer,
            rate,
            None,
            FeeRuleStatus::Active,
        )
    }

    #[test]
    fn test_percentage_rounds_half_up() {
        let rules = vec![percentage("MDR", FeePayer::Merchant, "0.015")];
        // 0.015 * 333.00 = 4.995
        let breakdown = compute_fees(&rules, &[], &query("MERCHANT_PAYMENT", "333.00"), Utc::now());
        assert_eq!(breakdown.items[0].amount, dec("5.00"));
        assert_eq!(breakdown.total, dec("5.00"));
    }

    #[test]
    fn test_flat_fee() {
        let rules = vec![catalog_rule(
            "SPLIT_ORCHESTRATION",
            "Split",
            FeeType::Flat,
            FeeCategory::Split,
            FeePayer::Merchant,
            "50",
            None,
            FeeRuleStatus::Active,
        )];
        let breakdown = compute_fees(&rules, &[], &query("SPLIT", "10000.00"), Utc::now());
        assert_eq!(breakdown.total, dec("50.00"));
    }

    #[test]
    fn test_tiered_picks_first_covering_band() {
        let mut rule = percentage("TIERED", FeePayer::Merchant, "0.05");
        rule.fee_type = FeeType::Tiered;
        rule.tiers = Json(vec![
            FeeTier { upto: dec("10000"), rate: dec("0.01") },
            FeeTier { upto: dec("1000"), rate: dec("0.02") },
        ]);
        let rules = vec![rule];

        let small = compute_fees(&rules, &[], &query("MERCHANT_PAYMENT", "500.00"), Utc::now());
        assert_eq!(small.total, dec("10.00"));

        let mid = compute_fees(&rules, &[], &query("MERCHANT_PAYMENT", "5000.00"), Utc::now());
        assert_eq!(mid.total, dec("50.00"));

        // Above every band: last band's rate.
        let large = compute_fees(&rules, &[], &query("MERCHANT_PAYMENT", "20000.00"), Utc::now());
        assert_eq!(large.total, dec("200.00"));
    }

    #[test]
    fn test_tiered_without_tiers_uses_rate() {
        let mut rule = percentage("TIERED", FeePayer::Merchant, "0.03");
        rule.fee_type = FeeType::Tiered;
        let breakdown = compute_fees(&[rule], &[], &query("MERCHANT_PAYMENT", "100.00"), Utc::now());
        assert_eq!(breakdown.total, dec("3.00"));
    }

    #[test]
    fn test_merchant_override_replaces_rate() {
        let merchant_id = Uuid::new_v4();
        let rules = vec![percentage("MDR_DEFAULT", FeePayer::Merchant, "0.015")];
        let overrides = vec![MerchantFeeOverride {
            merchant_id,
            fee_code: "MDR_DEFAULT".to_string(),
            fee_type: None,
            rate: Some(dec("0.005")),
            amount: None,
            tiers: None,
            active: true,
        }];

        let mut q = query("MERCHANT_PAYMENT", "1000.00");
        assert_eq!(compute_fees(&rules, &overrides, &q, Utc::now()).total, dec("15.00"));

        q.merchant_id = Some(merchant_id);
        assert_eq!(compute_fees(&rules, &overrides, &q, Utc::now()).total, dec("5.00"));
    }

    #[test]
    fn test_override_can_switch_to_flat() {
        let merchant_id = Uuid::new_v4();
        let rules = vec![percentage("MDR_DEFAULT", FeePayer::Merchant, "0.015")];
        let overrides = vec![MerchantFeeOverride {
            merchant_id,
            fee_code: "MDR_DEFAULT".to_string(),
            fee_type: Some(FeeType::Flat),
            rate: None,
            amount: Some(dec("25")),
            tiers: None,
            active: true,
        }];
        let mut q = query("MERCHANT_PAYMENT", "1000.00");
        q.merchant_id = Some(merchant_id);
        assert_eq!(compute_fees(&rules, &overrides, &q, Utc::now()).total, dec("25.00"));
    }

    #[test]
    fn test_inactive_expired_and_unfunded_rules_skipped() {
        let mut inactive = percentage("OFF", FeePayer::Merchant, "0.5");
        inactive.status = FeeRuleStatus::Inactive;
        let mut expired = percentage("OLD", FeePayer::Merchant, "0.5");
        expired.effective_end = Some(Utc::now() - Duration::days(1));
        let mut wallet_only = percentage("MDR_WALLET", FeePayer::Merchant, "0.01");
        wallet_only.funding_source = Some("BRIDGE_WALLET".to_string());

        let rules = vec![inactive, expired, wallet_only];
        let mut q = query("MERCHANT_PAYMENT", "100.00");
        assert!(compute_fees(&rules, &[], &q, Utc::now()).is_empty());

        q.funding_plan = Some("BRIDGE_WALLET".to_string());
        let breakdown = compute_fees(&rules, &[], &q, Utc::now());
        assert_eq!(breakdown.items.len(), 1);
        assert_eq!(breakdown.items[0].fee_code, "MDR_WALLET");
    }

    #[test]
    fn test_zero_fee_dropped() {
        let rules = vec![percentage("TINY", FeePayer::Merchant, "0.001")];
        // 0.001 * 1.00 = 0.001 -> 0.00
        assert!(compute_fees(&rules, &[], &query("MERCHANT_PAYMENT", "1.00"), Utc::now()).is_empty());
    }

    #[test]
    fn test_total_for_payer() {
        let rules = vec![
            percentage("CHECKOUT_CUSTOMER_FEE", FeePayer::Customer, "0.01"),
            percentage("MDR_DEFAULT", FeePayer::Merchant, "0.015"),
        ];
        let breakdown = compute_fees(&rules, &[], &query("MERCHANT_PAYMENT", "500.00"), Utc::now());
        assert_eq!(breakdown.total_for(FeePayer::Customer), dec("5.00"));
        assert_eq!(breakdown.total_for(FeePayer::Merchant), dec("7.50"));
        assert_eq!(breakdown.total, dec("12.50"));
    }

    #[test]
    fn test_fee_reference_format() {
        let id = "9f0c8f7e-0000-0000-0000-000000000001";
        assert_eq!(
            fee_reference("MERCHANT_PAYMENT", id, "MDR_DEFAULT"),
            format!("fee-merchant_payment-{}-MDR_DEFAULT", id)
        );
    }

    #[test]
    fn test_long_transaction_ids_get_distinct_references() {
        let shared = "t".repeat(120);
        let first = format!("{}-a", shared);
        let second = format!("{}-b", shared);

        let a = fee_reference("MERCHANT_PAYMENT", &first, "MDR_DEFAULT");
        let b = fee_reference("MERCHANT_PAYMENT", &second, "MDR_DEFAULT");
        let c = fee_reference("MERCHANT_PAYMENT", &first, "CHECKOUT_CUSTOMER_FEE");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("fee-merchant_payment-h"));
        assert!(a.ends_with("-MDR_DEFAULT"));
        // Leg suffixes must still fit a 160-character reference column.
        assert!(c.len() + "-cust".len() <= 160);
        assert_eq!(a, fee_reference("MERCHANT_PAYMENT", &first, "MDR_DEFAULT"));
    }

    #[test]
    fn test_transaction_id_bounds() {
        assert!(validate_transaction_id("order-1").is_ok());
        assert!(validate_transaction_id(&"t".repeat(120)).is_ok());
        for bad in ["", "   ", &"t".repeat(121)] {
            let err = validate_transaction_id(bad).unwrap_err();
            assert!(matches!(err, LedgerError::Validation { ref field, .. } if field == "transactionId"));
        }
    }

    #[test]
    fn test_default_catalog_codes_unique() {
        let catalog = default_catalog();
        let mut codes: Vec<&str> = catalog.iter().map(|r| r.code.as_str()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), catalog.len());
        assert!(catalog.iter().all(|r| FeeCategory::from_str(&r.applies_to).is_ok()));
    }
}
