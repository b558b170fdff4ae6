//! Escrow transitions for goods orders.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, IdempotencyKey};
use crate::authz::Actor;
use crate::error::AppError;
use crate::ledger::EscrowOutcome;

/// Request body for funding an escrow.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundEscrowRequest {
    /// Free-form condition the parties agreed on, e.g. `delivery_confirmed`.
    #[serde(default)]
    pub release_condition: String,
}

/// Creates the escrow router, mounted under `/orders`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{id}/escrow/fund", post(fund))
        .route("/{id}/escrow/release", post(release))
        .route("/{id}/escrow/cancel", post(cancel))
        .route("/{id}/escrow/refund", post(refund))
        .with_state(state)
}

/// POST /api/v1/orders/{id}/escrow/fund
async fn fund(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<Uuid>,
    body: Option<Json<FundEscrowRequest>>,
) -> Result<Json<EscrowOutcome>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let outcome = state
        .ledger
        .escrow_fund(actor, id, req.release_condition, key.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/orders/{id}/escrow/release
async fn release(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<Uuid>,
) -> Result<Json<EscrowOutcome>, AppError> {
    Ok(Json(state.ledger.escrow_release(actor, id, key.as_deref()).await?))
}

/// POST /api/v1/orders/{id}/escrow/cancel
async fn cancel(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<Uuid>,
) -> Result<Json<EscrowOutcome>, AppError> {
    Ok(Json(state.ledger.escrow_cancel(actor, id, key.as_deref()).await?))
}

/// POST /api/v1/orders/{id}/escrow/refund
async fn refund(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<Uuid>,
) -> Result<Json<EscrowOutcome>, AppError> {
    Ok(Json(state.ledger.escrow_refund(actor, id, key.as_deref()).await?))
}
