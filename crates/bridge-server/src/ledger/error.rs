//! Error taxonomy of the ledger core.

use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::store::StoreError;

/// Every failure a ledger operation can report.
///
/// All variants except `Storage` are raised before any write is issued, so
/// a caller receiving them knows nothing was persisted.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Insufficient funds in wallet {wallet_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        wallet_id: Uuid,
        available: BigDecimal,
        requested: BigDecimal,
    },

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl LedgerError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, used in API error bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Unauthenticated => "unauthenticated",
            LedgerError::Forbidden(_) => "forbidden",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InvalidState(_) => "invalid_state",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Validation { .. } => "validation_error",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::Storage(_) => "storage_error",
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateReference(reference) => {
                LedgerError::Conflict(format!("ledger reference already posted: {}", reference))
            }
            StoreError::Constraint(message) => LedgerError::Conflict(message),
            other => LedgerError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_reference_is_conflict() {
        let err: LedgerError = StoreError::DuplicateReference("esc-1-fund-cust".to_string()).into();
        assert_eq!(err.kind(), "conflict");
        assert!(err.to_string().contains("esc-1-fund-cust"));
    }

    #[test]
    fn test_timeout_is_storage() {
        let err: LedgerError = StoreError::Timeout.into();
        assert_eq!(err.kind(), "storage_error");
    }

    #[test]
    fn test_validation_display_names_field() {
        let err = LedgerError::validation("schedule", "must not be empty");
        assert_eq!(err.to_string(), "Invalid schedule: must not be empty");
    }
}
