//! Wallet top-up, transfer, withdrawal and balance endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use super::{AppState, IdempotencyKey};
use crate::authz::Actor;
use crate::error::AppError;
use crate::ledger::{
    DepositOutcome, DepositRequest, TransferOutcome, TransferRequest, WalletSummary,
    WithdrawRequest, WithdrawalOutcome,
};

/// Creates the wallets router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/deposit", post(deposit))
        .route("/transfer", post(transfer))
        .route("/withdraw", post(withdraw))
        .route("/{currency}", get(get_wallet))
        .with_state(state)
}

/// POST /api/v1/wallets/deposit
async fn deposit(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<DepositOutcome>), AppError> {
    let outcome = state.ledger.deposit(actor, req, key.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /api/v1/wallets/transfer
async fn transfer(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Json(req): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferOutcome>), AppError> {
    let outcome = state.ledger.transfer(actor, req, key.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /api/v1/wallets/withdraw
async fn withdraw(
    State(state): State<AppState>,
    actor: Actor,
    key: IdempotencyKey,
    Json(req): Json<WithdrawRequest>,
) -> Result<(StatusCode, Json<WithdrawalOutcome>), AppError> {
    let outcome = state.ledger.withdraw(actor, req, key.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /api/v1/wallets/{currency}
async fn get_wallet(
    State(state): State<AppState>,
    actor: Actor,
    Path(currency): Path<String>,
) -> Result<Json<WalletSummary>, AppError> {
    let currency = currency.to_ascii_uppercase();
    Ok(Json(state.ledger.wallet_summary(actor, currency).await?))
}
