//! Installment plan model: an order paid through an ordered schedule of legs.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// How installment money reaches the merchant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "plan_mode", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanMode {
    /// Legs accumulate in escrow; the merchant is paid once every leg is in.
    InstallmentPayAfter,
    /// Goods ship first; every leg goes straight to the merchant.
    DeliverThenCollect,
}

/// Overall plan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "plan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Completed,
}

/// Status of a single installment leg. Unpaid -> paid is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "leg_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LegStatus {
    Unpaid,
    Paid,
}

/// One scheduled payment of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstallmentLeg {
    pub plan_id: Uuid,
    /// Zero-based position in the schedule.
    #[sqlx(rename = "leg_index")]
    pub index: i32,
    pub amount: BigDecimal,
    pub status: LegStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Represents an installment plan for an order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstallmentPlan {
    /// Unique identifier for this plan.
    pub id: Uuid,
    /// Order the plan pays for.
    pub order_id: Uuid,
    pub mode: PlanMode,
    /// Equal to the order total.
    pub total_amount: BigDecimal,
    /// Sum of paid legs.
    pub paid_amount: BigDecimal,
    pub currency: String,
    pub status: PlanStatus,
    /// Legs ordered by index (loaded separately).
    #[sqlx(skip)]
    pub legs: Vec<InstallmentLeg>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Data required to create a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInstallmentPlan {
    pub order_id: Uuid,
    pub mode: PlanMode,
    pub total_amount: BigDecimal,
    pub currency: String,
    /// Leg amounts in schedule order.
    pub schedule: Vec<BigDecimal>,
}

impl InstallmentPlan {
    pub fn leg(&self, index: usize) -> Option<&InstallmentLeg> {
        self.legs.get(index)
    }

    /// Index of the earliest leg still unpaid.
    pub fn first_unpaid_index(&self) -> Option<usize> {
        self.legs.iter().position(|leg| leg.status == LegStatus::Unpaid)
    }

    pub fn all_paid(&self) -> bool {
        self.legs.iter().all(|leg| leg.status == LegStatus::Paid)
    }

    pub fn is_completed(&self) -> bool {
        self.status == PlanStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn plan_with(statuses: &[LegStatus]) -> InstallmentPlan {
        let id = Uuid::new_v4();
        InstallmentPlan {
            id,
            order_id: Uuid::new_v4(),
            mode: PlanMode::InstallmentPayAfter,
            total_amount: BigDecimal::from(300 * statuses.len() as i64),
            paid_amount: BigDecimal::from(0),
            currency: "KES".to_string(),
            status: PlanStatus::Active,
            legs: statuses
                .iter()
                .enumerate()
                .map(|(i, status)| InstallmentLeg {
                    plan_id: id,
                    index: i as i32,
                    amount: BigDecimal::from_str("300.00").unwrap(),
                    status: *status,
                    paid_at: None,
                })
                .collect(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_plan_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&PlanMode::InstallmentPayAfter).unwrap(),
            "\"INSTALLMENT_PAY_AFTER\""
        );
        assert_eq!(
            serde_json::from_str::<PlanMode>("\"DELIVER_THEN_COLLECT\"").unwrap(),
            PlanMode::DeliverThenCollect
        );
        assert!(serde_json::from_str::<PlanMode>("\"PAY_LATER\"").is_err());
    }

    #[test]
    fn test_first_unpaid_index() {
        let plan = plan_with(&[LegStatus::Paid, LegStatus::Unpaid, LegStatus::Unpaid]);
        assert_eq!(plan.first_unpaid_index(), Some(1));
        assert!(!plan.all_paid());

        let done = plan_with(&[LegStatus::Paid, LegStatus::Paid]);
        assert_eq!(done.first_unpaid_index(), None);
        assert!(done.all_paid());
    }

    #[test]
    fn test_leg_lookup_out_of_bounds() {
        let plan = plan_with(&[LegStatus::Unpaid]);
        assert!(plan.leg(0).is_some());
        assert!(plan.leg(1).is_none());
    }
}
