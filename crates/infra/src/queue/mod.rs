//! Durable job queue boundary.
//!
//! The queue owns in-flight visibility and delivery counts. A dequeued
//! message stays invisible for the queue's visibility timeout; if it is not
//! acknowledged within that window it becomes deliverable again with its
//! delivery count incremented. There is no explicit nack.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::InMemoryQueue;
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsConfig, RedisStreamsQueue};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Queue-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A delivered message. `body` is the raw, undeserialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: MessageId,
    /// Handle for this particular delivery; acking with a stale receipt fails.
    pub receipt: String,
    pub body: String,
    /// 1 on first delivery.
    pub delivery_count: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lease expired for message {0}")]
    LeaseExpired(MessageId),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, body: String) -> Result<MessageId, QueueError>;

    /// Next visible message, or `None` when nothing is deliverable right now.
    async fn dequeue(&self) -> Result<Option<QueueMessage>, QueueError>;

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;
}
