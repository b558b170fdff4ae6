//! Idempotency record model: replayable responses for retried requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored response keyed by a caller-supplied idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IdempotencyRecord {
    pub key: String,
    /// Entity the original request acted on (order, plan, transaction).
    pub entity_id: String,
    /// Response returned to the first caller, replayed verbatim.
    pub response: serde_json::Value,
    /// SHA-256 of the original request, hex encoded.
    pub request_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Data required to save an idempotency record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIdempotencyRecord {
    pub key: String,
    pub entity_id: String,
    pub response: serde_json::Value,
    pub request_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
