//! API routes for the Bridge server.

pub mod billing;
pub mod escrow;
pub mod health;
pub mod installments;
pub mod orders;
pub mod wallets;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::Router;
use std::convert::Infallible;
use tower_http::trace::TraceLayer;

use crate::authz::Authorizer;
use crate::ledger::Ledger;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub authorizer: Authorizer,
}

impl AppState {
    pub fn new(ledger: Ledger) -> Self {
        let authorizer = Authorizer::new(ledger.store());
        Self { ledger, authorizer }
    }
}

impl FromRef<AppState> for Authorizer {
    fn from_ref(state: &AppState) -> Self {
        state.authorizer.clone()
    }
}

/// Value of the `Idempotency-Key` header, if present.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKey(pub Option<String>);

impl IdempotencyKey {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for IdempotencyKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok(IdempotencyKey(key))
    }
}

/// Creates the main API router with all routes mounted.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Creates the v1 API routes.
fn api_v1_routes(state: AppState) -> Router {
    Router::new()
        .nest(
            "/orders",
            orders::router(state.clone()).merge(escrow::router(state.clone())),
        )
        .nest("/installments", installments::router(state.clone()))
        .nest("/billing", billing::router(state.clone()))
        .nest("/wallets", wallets::router(state.clone()))
        .merge(health::router(state))
}
