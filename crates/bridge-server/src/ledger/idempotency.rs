//! Idempotency guard: replays the stored response of a retried mutation.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::LedgerError;
use crate::models::{IdempotencyRecord, NewIdempotencyRecord};
use crate::store::{LedgerStore, StoreError, UnitOfWork};

pub const DEFAULT_TTL_HOURS: i64 = 24;
/// Client keys are stored as `{user_id}:{key}` in a 255-character column.
const MAX_KEY_LEN: usize = 200;

/// SHA-256 over the operation name and the request body.
///
/// `serde_json::Value` objects serialize with sorted keys, so equal requests
/// hash equally regardless of field order.
pub fn fingerprint(operation: &str, request: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"\n");
    hasher.update(request.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn validate_key(key: &str) -> Result<(), LedgerError> {
    if key.trim().is_empty() {
        return Err(LedgerError::validation("idempotencyKey", "must not be blank"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(LedgerError::validation(
            "idempotencyKey",
            format!("must be at most {} characters", MAX_KEY_LEN),
        ));
    }
    Ok(())
}

/// Looks up a live record for `key`.
///
/// A record stored for a different request is a `Conflict`. Expired records
/// are purged and treated as absent.
pub async fn find_idempotent(
    uow: &mut dyn UnitOfWork,
    key: &str,
    request_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<IdempotencyRecord>, LedgerError> {
    let record = match uow.find_idempotency(key).await? {
        Some(record) => record,
        None => return Ok(None),
    };

    if record.is_expired(now) {
        uow.purge_idempotency(now).await?;
        return Ok(None);
    }

    if record.request_hash != request_hash {
        return Err(LedgerError::Conflict(format!(
            "idempotency key {} was used for a different request",
            key
        )));
    }

    Ok(Some(record))
}

/// First writer wins; returns false when the key was already taken.
pub async fn save_idempotent(
    uow: &mut dyn UnitOfWork,
    record: NewIdempotencyRecord,
) -> Result<bool, LedgerError> {
    Ok(uow.insert_idempotency(record).await?)
}

/// Deletes every record expired at `now`.
pub async fn purge_expired(
    store: &dyn LedgerStore,
    now: DateTime<Utc>,
) -> Result<u64, LedgerError> {
    let mut uow = store.begin().await?;
    let purged = uow.purge_idempotency(now).await?;
    uow.commit().await?;
    Ok(purged)
}

/// Stored form of a client key. Keys are private to the user who sent them.
pub fn scoped_key(user_id: Uuid, key: &str) -> String {
    format!("{}:{}", user_id, key)
}

/// Per-call guard. Without a key both operations are no-ops.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    key: Option<String>,
    request_hash: String,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(
        user_id: Uuid,
        key: Option<&str>,
        operation: &str,
        request: &Value,
        ttl: Duration,
    ) -> Result<Self, LedgerError> {
        if let Some(key) = key {
            validate_key(key)?;
        }
        Ok(Self {
            key: key.map(|key| scoped_key(user_id, key)),
            request_hash: fingerprint(operation, request),
            ttl,
        })
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Stored response for this key, if the operation already ran.
    pub async fn replay<T: DeserializeOwned>(
        &self,
        uow: &mut dyn UnitOfWork,
    ) -> Result<Option<T>, LedgerError> {
        let key = match &self.key {
            Some(key) => key,
            None => return Ok(None),
        };
        match find_idempotent(uow, key, &self.request_hash, Utc::now()).await? {
            Some(record) => {
                let response = serde_json::from_value(record.response).map_err(StoreError::from)?;
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    /// Saves `response` under the key inside the caller's unit of work.
    ///
    /// Returns false when a concurrent writer recorded the key first; the
    /// caller must then discard its own work and replay the winner.
    pub async fn record<T: Serialize>(
        &self,
        uow: &mut dyn UnitOfWork,
        entity_id: &str,
        response: &T,
    ) -> Result<bool, LedgerError> {
        let key = match &self.key {
            Some(key) => key,
            None => return Ok(true),
        };
        let response = serde_json::to_value(response).map_err(StoreError::from)?;
        let saved = save_idempotent(
            uow,
            NewIdempotencyRecord {
                key: key.clone(),
                entity_id: entity_id.to_string(),
                response,
                request_hash: self.request_hash.clone(),
                expires_at: Utc::now() + self.ttl,
            },
        )
        .await?;
        if !saved {
            tracing::warn!(key = %key, entity_id = %entity_id, "Idempotency key already recorded");
        }
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_fingerprint_ignores_field_order() {
        let a = json!({"orderId": "1", "releaseCondition": "delivered"});
        let b = json!({"releaseCondition": "delivered", "orderId": "1"});
        assert_eq!(fingerprint("escrow.fund", &a), fingerprint("escrow.fund", &b));
        assert_ne!(fingerprint("escrow.fund", &a), fingerprint("escrow.cancel", &a));
        assert_eq!(fingerprint("escrow.fund", &a).len(), 64);
    }

    #[test]
    fn test_blank_key_rejected() {
        let err = IdempotencyGuard::new(Uuid::new_v4(), Some("  "), "op", &json!({}), Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { ref field, .. } if field == "idempotencyKey"));

        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(IdempotencyGuard::new(Uuid::new_v4(), Some(&long), "op", &json!({}), Duration::hours(1)).is_err());
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_user() {
        let store = MemoryStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let request = json!({"a": 1});
        let theirs = IdempotencyGuard::new(alice, Some("k-0"), "op", &request, Duration::hours(24)).unwrap();
        let ours = IdempotencyGuard::new(bob, Some("k-0"), "op", &json!({"a": 2}), Duration::hours(24)).unwrap();

        let mut uow = store.begin().await.unwrap();
        assert!(theirs.record(uow.as_mut(), "e", &json!("alice")).await.unwrap());
        assert!(ours.replay::<Value>(uow.as_mut()).await.unwrap().is_none());
        assert!(ours.record(uow.as_mut(), "e", &json!("bob")).await.unwrap());
        uow.commit().await.unwrap();

        let keys: Vec<String> = store
            .idempotency_records()
            .await
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert!(keys.contains(&scoped_key(alice, "k-0")));
        assert!(keys.contains(&scoped_key(bob, "k-0")));
    }

    #[tokio::test]
    async fn test_record_then_replay() {
        let store = MemoryStore::new();
        let guard =
            IdempotencyGuard::new(Uuid::new_v4(), Some("k-1"), "op", &json!({"a": 1}), Duration::hours(24))
                .unwrap();

        let mut uow = store.begin().await.unwrap();
        assert!(guard.replay::<Value>(uow.as_mut()).await.unwrap().is_none());
        guard
            .record(uow.as_mut(), "entity-1", &json!({"status": "ok"}))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let replayed: Option<Value> = guard.replay(uow.as_mut()).await.unwrap();
        assert_eq!(replayed, Some(json!({"status": "ok"})));
    }

    #[tokio::test]
    async fn test_key_reuse_with_different_request_conflicts() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let first =
            IdempotencyGuard::new(user, Some("k-2"), "op", &json!({"a": 1}), Duration::hours(24)).unwrap();
        let second =
            IdempotencyGuard::new(user, Some("k-2"), "op", &json!({"a": 2}), Duration::hours(24)).unwrap();

        let mut uow = store.begin().await.unwrap();
        first.record(uow.as_mut(), "e", &json!({})).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let err = second.replay::<Value>(uow.as_mut()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let record = |response: Value| NewIdempotencyRecord {
            key: "k-3".to_string(),
            entity_id: "e".to_string(),
            response,
            request_hash: "h".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };

        assert!(save_idempotent(uow.as_mut(), record(json!(1))).await.unwrap());
        assert!(!save_idempotent(uow.as_mut(), record(json!(2))).await.unwrap());

        let stored = find_idempotent(uow.as_mut(), "k-3", "h", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.response, json!(1));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        save_idempotent(
            uow.as_mut(),
            NewIdempotencyRecord {
                key: "old".to_string(),
                entity_id: "e".to_string(),
                response: json!({}),
                request_hash: "h".to_string(),
                expires_at: Utc::now() - Duration::hours(1),
            },
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(purge_expired(&store, Utc::now()).await.unwrap(), 1);
        assert!(store.idempotency_records().await.is_empty());
    }
}
