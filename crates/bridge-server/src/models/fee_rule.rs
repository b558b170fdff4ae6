//! Fee catalog model: rules the fee engine prices transactions with.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Transaction categories fee rules apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeCategory {
    MerchantPayment,
    Project,
    Split,
    Scheduled,
    InstallmentCompleted,
    Topup,
    Withdrawal,
    Fx,
}

impl FeeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeCategory::MerchantPayment => "MERCHANT_PAYMENT",
            FeeCategory::Project => "PROJECT",
            FeeCategory::Split => "SPLIT",
            FeeCategory::Scheduled => "SCHEDULED",
            FeeCategory::InstallmentCompleted => "INSTALLMENT_COMPLETED",
            FeeCategory::Topup => "TOPUP",
            FeeCategory::Withdrawal => "WITHDRAWAL",
            FeeCategory::Fx => "FX",
        }
    }
}

impl fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MERCHANT_PAYMENT" => Ok(FeeCategory::MerchantPayment),
            "PROJECT" => Ok(FeeCategory::Project),
            "SPLIT" => Ok(FeeCategory::Split),
            "SCHEDULED" => Ok(FeeCategory::Scheduled),
            "INSTALLMENT_COMPLETED" => Ok(FeeCategory::InstallmentCompleted),
            "TOPUP" => Ok(FeeCategory::Topup),
            "WITHDRAWAL" => Ok(FeeCategory::Withdrawal),
            "FX" => Ok(FeeCategory::Fx),
            other => Err(format!("Unknown fee category: {}", other)),
        }
    }
}

/// How a fee amount is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "fee_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FeeType {
    /// Fixed amount per transaction.
    Flat,
    /// `rate` times the base amount.
    Percentage,
    /// Rate chosen from amount bands.
    Tiered,
}

/// Account that bears a fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "fee_payer", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FeePayer {
    Customer,
    Merchant,
    Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "fee_rule_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FeeRuleStatus {
    Active,
    Inactive,
}

/// One band of a tiered fee: amounts up to `upto` pay `rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub upto: BigDecimal,
    pub rate: BigDecimal,
}

/// A fee catalog rule.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeeRule {
    /// Stable fee code, e.g. `MDR_DEFAULT`.
    pub code: String,
    /// Human-readable name.
    pub name: String,
    pub fee_type: FeeType,
    /// Category string; matched against `FeeCategory::as_str`.
    pub applies_to: String,
    pub payer: FeePayer,
    /// Rate for percentage fees and the fallback rate for tiered fees.
    pub rate: Option<BigDecimal>,
    /// Amount for flat fees.
    pub amount: Option<BigDecimal>,
    pub tiers: Json<Vec<FeeTier>>,
    /// When set, the rule only applies to transactions funded this way.
    pub funding_source: Option<String>,
    pub status: FeeRuleStatus,
    pub effective_start: Option<DateTime<Utc>>,
    pub effective_end: Option<DateTime<Utc>>,
}

impl FeeRule {
    /// Check if the rule is active and inside its effective window.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == FeeRuleStatus::Active
            && self.effective_start.map_or(true, |start| start <= now)
            && self.effective_end.map_or(true, |end| end >= now)
    }

    /// Check if the rule applies to the given funding plan.
    pub fn matches_funding(&self, funding_plan: Option<&str>) -> bool {
        match self.funding_source.as_deref() {
            None => true,
            Some(source) => funding_plan == Some(source),
        }
    }
}

/// Per-merchant replacement of a catalog rule's pricing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MerchantFeeOverride {
    pub merchant_id: Uuid,
    pub fee_code: String,
    pub fee_type: Option<FeeType>,
    pub rate: Option<BigDecimal>,
    pub amount: Option<BigDecimal>,
    pub tiers: Option<Json<Vec<FeeTier>>>,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rule() -> FeeRule {
        FeeRule {
            code: "MDR_DEFAULT".to_string(),
            name: "Merchant Discount Rate".to_string(),
            fee_type: FeeType::Percentage,
            applies_to: "MERCHANT_PAYMENT".to_string(),
            payer: FeePayer::Merchant,
            rate: Some(BigDecimal::from_str("0.015").unwrap()),
            amount: None,
            tiers: Json(vec![]),
            funding_source: None,
            status: FeeRuleStatus::Active,
            effective_start: None,
            effective_end: None,
        }
    }

    #[test]
    fn test_category_round_trip_names() {
        for category in [
            FeeCategory::MerchantPayment,
            FeeCategory::Project,
            FeeCategory::Scheduled,
            FeeCategory::InstallmentCompleted,
        ] {
            assert_eq!(category.as_str().parse::<FeeCategory>().unwrap(), category);
            assert_eq!(
                serde_json::to_string(&category).unwrap(),
                format!("\"{}\"", category.as_str())
            );
        }
        assert!("BOGUS".parse::<FeeCategory>().is_err());
    }

    #[test]
    fn test_effective_window() {
        let now = Utc::now();
        assert!(rule().is_effective(now));

        let future = FeeRule {
            effective_start: Some(now + Duration::days(1)),
            ..rule()
        };
        assert!(!future.is_effective(now));

        let expired = FeeRule {
            effective_end: Some(now - Duration::days(1)),
            ..rule()
        };
        assert!(!expired.is_effective(now));

        let inactive = FeeRule {
            status: FeeRuleStatus::Inactive,
            ..rule()
        };
        assert!(!inactive.is_effective(now));
    }

    #[test]
    fn test_funding_scope() {
        assert!(rule().matches_funding(None));
        assert!(rule().matches_funding(Some("BRIDGE_WALLET")));

        let scoped = FeeRule {
            funding_source: Some("LEMONADE_MPESA".to_string()),
            ..rule()
        };
        assert!(scoped.matches_funding(Some("LEMONADE_MPESA")));
        assert!(!scoped.matches_funding(Some("BRIDGE_WALLET")));
        assert!(!scoped.matches_funding(None));
    }

    #[test]
    fn test_tier_deserialization() {
        let tiers: Vec<FeeTier> =
            serde_json::from_str(r#"[{"upto": "1000", "rate": "0.02"}]"#).unwrap();
        assert_eq!(tiers[0].upto, BigDecimal::from(1000));
        assert_eq!(tiers[0].rate, BigDecimal::from_str("0.02").unwrap());
    }
}
