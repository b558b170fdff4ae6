//! Fee quote and fee application endpoints.

use axum::{extract::State, routing::post, Json, Router};

use super::{AppState, IdempotencyKey};
use crate::authz::Actor;
use crate::error::AppError;
use crate::ledger::{AppliedFeesResult, ApplyFeesRequest, FeeBreakdown, FeeQuery};

/// Creates the billing router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/calculate", post(calculate_fees))
        .route("/apply", post(apply_fees))
        .with_state(state)
}

/// POST /api/v1/billing/calculate
///
/// Any authenticated caller may request a quote.
async fn calculate_fees(
    State(state): State<AppState>,
    _actor: Actor,
    Json(query): Json<FeeQuery>,
) -> Result<Json<FeeBreakdown>, AppError> {
    Ok(Json(state.ledger.calculate_fees(query).await?))
}

/// POST /api/v1/billing/apply
///
/// The body's `idempotencyKey` wins over the header.
async fn apply_fees(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Json(mut req): Json<ApplyFeesRequest>,
) -> Result<Json<AppliedFeesResult>, AppError> {
    if req.idempotency_key.is_none() {
        req.idempotency_key = key.0;
    }
    Ok(Json(state.ledger.apply_fees(actor, req).await?))
}
