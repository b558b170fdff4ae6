//! HTTP error mapping for the Bridge server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Ledger(err) => match err {
                LedgerError::Unauthenticated => StatusCode::UNAUTHORIZED,
                LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
                LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::InvalidState(_) | LedgerError::Conflict(_) => StatusCode::CONFLICT,
                LedgerError::Validation { .. } | LedgerError::InsufficientFunds { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                LedgerError::Storage(StoreError::Timeout) => StatusCode::SERVICE_UNAVAILABLE,
                LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::BadRequest(msg) => json!({ "error": "bad_request", "message": msg }),
            AppError::Ledger(LedgerError::Validation { field, message }) => json!({
                "error": "validation_error",
                "message": message,
                "field": field,
            }),
            AppError::Ledger(err @ LedgerError::InsufficientFunds { .. }) => json!({
                "error": err.kind(),
                "message": err.to_string(),
                "field": "amount",
            }),
            AppError::Ledger(err) if status.is_server_error() => {
                tracing::error!("Storage error: {}", err);
                json!({ "error": err.kind(), "message": "Internal server error" })
            }
            AppError::Ledger(err) => json!({ "error": err.kind(), "message": err.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LedgerError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (LedgerError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (LedgerError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (LedgerError::InvalidState("x".into()), StatusCode::CONFLICT),
            (LedgerError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                LedgerError::validation("amount", "must be positive"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LedgerError::InsufficientFunds {
                    wallet_id: Uuid::nil(),
                    available: BigDecimal::from(1),
                    requested: BigDecimal::from(2),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (LedgerError::Storage(StoreError::Timeout), StatusCode::SERVICE_UNAVAILABLE),
            (
                LedgerError::Storage(StoreError::MissingRow("wallet".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
    }
}
