//! Payment event queue handed to the ledger at construction.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Notification emitted after a money movement commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PaymentEvent {
    OrderPaid {
        order_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    WalletToppedUp {
        wallet_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    WalletTransferred {
        reference: String,
        from_wallet_id: Uuid,
        to_wallet_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    WalletWithdrawn {
        withdrawal_id: Uuid,
        wallet_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    EscrowFunded {
        order_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    EscrowReleased {
        order_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    EscrowCancelled {
        order_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    EscrowRefunded {
        order_id: Uuid,
        amount: BigDecimal,
        currency: String,
    },
    InstallmentPaid {
        plan_id: Uuid,
        order_id: Uuid,
        index: i32,
        amount: BigDecimal,
    },
    PlanCompleted {
        plan_id: Uuid,
        order_id: Uuid,
    },
    FeesApplied {
        transaction_id: String,
        total: BigDecimal,
        currency: String,
    },
}

impl PaymentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::OrderPaid { .. } => "order_paid",
            PaymentEvent::WalletToppedUp { .. } => "wallet_topped_up",
            PaymentEvent::WalletTransferred { .. } => "wallet_transferred",
            PaymentEvent::WalletWithdrawn { .. } => "wallet_withdrawn",
            PaymentEvent::EscrowFunded { .. } => "escrow_funded",
            PaymentEvent::EscrowReleased { .. } => "escrow_released",
            PaymentEvent::EscrowCancelled { .. } => "escrow_cancelled",
            PaymentEvent::EscrowRefunded { .. } => "escrow_refunded",
            PaymentEvent::InstallmentPaid { .. } => "installment_paid",
            PaymentEvent::PlanCompleted { .. } => "plan_completed",
            PaymentEvent::FeesApplied { .. } => "fees_applied",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Payment queue is full")]
    Full,

    #[error("Payment queue is closed")]
    Closed,
}

#[async_trait]
pub trait PaymentQueue: Send + Sync {
    async fn publish(&self, event: PaymentEvent) -> Result<(), QueueError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopQueue;

#[async_trait]
impl PaymentQueue for NoopQueue {
    async fn publish(&self, _event: PaymentEvent) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Bounded in-process queue. Publishing never waits: a full queue is an error.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<PaymentEvent>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PaymentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PaymentQueue for ChannelQueue {
    async fn publish(&self, event: PaymentEvent) -> Result<(), QueueError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// Drains the queue, logging each event, until every sender is dropped.
pub async fn run_consumer(mut rx: mpsc::Receiver<PaymentEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(event = event.name(), %payload, "Payment event"),
            Err(e) => tracing::warn!(event = event.name(), error = %e, "Unserializable payment event"),
        }
    }
    tracing::info!("Payment event consumer stopped");
}
