//! Installment plan endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, IdempotencyKey};
use crate::authz::Actor;
use crate::error::AppError;
use crate::ledger::{CreatePlanRequest, InstallmentPayment};
use crate::models::InstallmentPlan;

/// Request body for paying one leg.
#[derive(Debug, Deserialize)]
pub struct PayInstallmentRequest {
    /// Zero-based leg index.
    pub index: i64,
}

/// Creates the installments router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_plan))
        .route("/{id}", get(get_plan))
        .route("/{id}/pay", post(pay_installment))
        .with_state(state)
}

/// POST /api/v1/installments
async fn create_plan(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<InstallmentPlan>), AppError> {
    let plan = state.ledger.create_plan(actor, req, key.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// GET /api/v1/installments/{id}
async fn get_plan(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<InstallmentPlan>, AppError> {
    Ok(Json(state.ledger.get_plan(actor, id).await?))
}

/// POST /api/v1/installments/{id}/pay
async fn pay_installment(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Path(id): Path<Uuid>,
    Json(req): Json<PayInstallmentRequest>,
) -> Result<Json<InstallmentPayment>, AppError> {
    let payment = state
        .ledger
        .pay_installment(actor, id, req.index, key.as_deref())
        .await?;
    Ok(Json(payment))
}
