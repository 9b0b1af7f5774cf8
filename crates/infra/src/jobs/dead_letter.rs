//! Dead-letter handling for poison and exhausted messages.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::{MessageId, QueueError, QueueMessage};

/// Why a message was dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Body did not deserialize or failed validation.
    MalformedMessage { detail: String },
    /// The pipeline reported a failure that will not go away on retry.
    PermanentFailure { detail: String },
    /// Transient failures until the delivery limit was reached.
    DeliveriesExhausted {
        deliveries: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
    },
}

impl DeadLetterReason {
    pub fn label(&self) -> &'static str {
        match self {
            DeadLetterReason::MalformedMessage { .. } => "malformed_message",
            DeadLetterReason::PermanentFailure { .. } => "permanent_failure",
            DeadLetterReason::DeliveriesExhausted { .. } => "deliveries_exhausted",
        }
    }
}

impl core::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeadLetterReason::MalformedMessage { detail } => write!(f, "malformed message: {detail}"),
            DeadLetterReason::PermanentFailure { detail } => write!(f, "permanent failure: {detail}"),
            DeadLetterReason::DeliveriesExhausted {
                deliveries,
                last_error,
            } => match last_error {
                Some(e) => write!(f, "gave up after {deliveries} deliveries: {e}"),
                None => write!(f, "gave up after {deliveries} deliveries"),
            },
        }
    }
}

/// Original envelope plus the raw body, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub reason: DeadLetterReason,
    pub message_id: MessageId,
    pub delivery_count: u32,
    pub body: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(reason: DeadLetterReason, message: &QueueMessage) -> Self {
        Self {
            reason,
            message_id: message.id.clone(),
            delivery_count: message.delivery_count,
            body: message.body.clone(),
            failed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, record: DeadLetterRecord) -> Result<(), QueueError>;

    /// Most recent records first.
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError>;
}

/// In-memory dead-letter store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    records: RwLock<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterStore {
    async fn dead_letter(&self, record: DeadLetterRecord) -> Result<(), QueueError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}
