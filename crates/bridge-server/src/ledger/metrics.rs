//! Operation counters, constructed once and shared by reference.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::LedgerError;

#[derive(Debug, Default)]
pub struct LedgerMetrics {
    operations: AtomicU64,
    replays: AtomicU64,
    auth_failures: AtomicU64,
    not_found: AtomicU64,
    state_failures: AtomicU64,
    validation_failures: AtomicU64,
    insufficient_funds: AtomicU64,
    storage_failures: AtomicU64,
    queue_failures: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub operations: u64,
    pub replays: u64,
    pub auth_failures: u64,
    pub not_found: u64,
    pub state_failures: u64,
    pub validation_failures: u64,
    pub insufficient_funds: u64,
    pub storage_failures: u64,
    pub queue_failures: u64,
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_failure(&self) {
        self.queue_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &LedgerError) {
        let counter = match err {
            LedgerError::Unauthenticated | LedgerError::Forbidden(_) => &self.auth_failures,
            LedgerError::NotFound(_) => &self.not_found,
            LedgerError::InvalidState(_) | LedgerError::Conflict(_) => &self.state_failures,
            LedgerError::Validation { .. } => &self.validation_failures,
            LedgerError::InsufficientFunds { .. } => &self.insufficient_funds,
            LedgerError::Storage(_) => &self.storage_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: self.operations.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            state_failures: self.state_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            insufficient_funds: self.insufficient_funds.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            queue_failures: self.queue_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_bucketed_by_kind() {
        let metrics = LedgerMetrics::new();
        metrics.record_success();
        metrics.record_failure(&LedgerError::Conflict("x".into()));
        metrics.record_failure(&LedgerError::InvalidState("y".into()));
        metrics.record_failure(&LedgerError::validation("amount", "bad"));
        metrics.record_replay();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations, 1);
        assert_eq!(snapshot.state_failures, 2);
        assert_eq!(snapshot.validation_failures, 1);
        assert_eq!(snapshot.replays, 1);
        assert_eq!(snapshot.storage_failures, 0);
    }
}
