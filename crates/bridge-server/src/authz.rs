//! Request identity and the ownership rules ledger operations enforce.
//!
//! Authentication happens upstream: the gateway forwards the caller's id in
//! `X-User-Id` and, when known, the role in `X-User-Role`. A request without
//! a role header gets exactly one lookup through [`Authorizer::resolve_role`].

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger::LedgerError;
use crate::models::{Order, Role};
use crate::store::LedgerStore;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), LedgerError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("admin role required".to_string()))
        }
    }

    /// The order's customer, or an admin.
    pub fn require_customer_of(&self, order: &Order) -> Result<(), LedgerError> {
        if self.is_admin() || order.customer_id == self.user_id {
            Ok(())
        } else {
            Err(LedgerError::Forbidden(format!(
                "only the customer may act on order {}",
                order.id
            )))
        }
    }

    /// The order's customer or merchant, or an admin.
    pub fn require_party_to(&self, order: &Order) -> Result<(), LedgerError> {
        if self.is_admin() || order.involves(self.user_id) {
            Ok(())
        } else {
            Err(LedgerError::Forbidden(format!(
                "not a party to order {}",
                order.id
            )))
        }
    }

    /// Acting on one's own account, or an admin acting on anyone's.
    pub fn require_self_or_admin(&self, user_id: Uuid) -> Result<(), LedgerError> {
        if self.is_admin() || self.user_id == user_id {
            Ok(())
        } else {
            Err(LedgerError::Forbidden(
                "cannot act on another user's wallet".to_string(),
            ))
        }
    }
}

/// Single entry point for role lookups.
#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn LedgerStore>,
}

impl Authorizer {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Role recorded for `user_id`. Users without a row are customers.
    pub async fn resolve_role(&self, user_id: Uuid) -> Result<Role, LedgerError> {
        let mut uow = self.store.begin().await?;
        let role = uow.user_role(user_id).await?;
        Ok(role.unwrap_or(Role::Customer))
    }
}

impl<S> FromRequestParts<S> for Actor
where
    Authorizer: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or(LedgerError::Unauthenticated)?;

        let header_role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .map(|value| {
                value
                    .to_str()
                    .ok()
                    .and_then(|s| Role::from_str(s.trim()).ok())
                    .ok_or_else(|| LedgerError::validation("X-User-Role", "unknown role"))
            })
            .transpose()?;

        let role = match header_role {
            Some(role) => role,
            None => Authorizer::from_ref(state).resolve_role(user_id).await?,
        };

        Ok(Actor::new(user_id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, PaymentMode};
    use crate::store::MemoryStore;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn order(customer_id: Uuid, merchant_id: Uuid) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id,
            merchant_id,
            amount: BigDecimal::from(100),
            currency: "KES".to_string(),
            payment_mode: PaymentMode::Escrow,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_order_ownership_rules() {
        let customer = Actor::new(Uuid::new_v4(), Role::Customer);
        let merchant = Actor::new(Uuid::new_v4(), Role::Merchant);
        let stranger = Actor::new(Uuid::new_v4(), Role::Customer);
        let admin = Actor::new(Uuid::new_v4(), Role::Admin);
        let order = order(customer.user_id, merchant.user_id);

        assert!(customer.require_customer_of(&order).is_ok());
        assert!(merchant.require_customer_of(&order).is_err());
        assert!(admin.require_customer_of(&order).is_ok());

        assert!(merchant.require_party_to(&order).is_ok());
        assert!(matches!(
            stranger.require_party_to(&order),
            Err(LedgerError::Forbidden(_))
        ));
        assert!(stranger.require_admin().is_err());
    }

    #[tokio::test]
    async fn test_resolve_role_defaults_to_customer() {
        let store = MemoryStore::new();
        let admin_id = Uuid::new_v4();
        store.set_role(admin_id, Role::Admin).await;

        let authorizer = Authorizer::new(Arc::new(store));
        assert_eq!(authorizer.resolve_role(admin_id).await.unwrap(), Role::Admin);
        assert_eq!(
            authorizer.resolve_role(Uuid::new_v4()).await.unwrap(),
            Role::Customer
        );
    }
}
