//! Order checkout and direct payment endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::{AppState, IdempotencyKey};
use crate::authz::Actor;
use crate::error::AppError;
use crate::ledger::{CreateOrderRequest, PaymentOutcome};
use crate::models::Order;

/// Creates the orders router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/{id}", get(get_order))
        .route("/{id}/pay-now", post(pay_now))
        .with_state(state)
}

/// POST /api/v1/orders
async fn create_order(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state.ledger.create_order(actor, req, key.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/v1/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.ledger.get_order(actor, id).await?))
}

/// POST /api/v1/orders/{id}/pay-now
async fn pay_now(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentOutcome>, AppError> {
    Ok(Json(state.ledger.pay_now(actor, id, key.as_deref()).await?))
}
