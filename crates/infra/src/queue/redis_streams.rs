//! Redis Streams-backed job queue (durable, at-least-once delivery).
//!
//! - **Enqueue**: `XADD {stream} * body <json>`
//! - **Dequeue**: first reclaim one entry idle longer than the visibility
//!   timeout (`XPENDING ... IDLE` + `XCLAIM`), else read a new entry with
//!   `XREADGROUP ... >`. Delivery counts come from the pending entries list.
//! - **Ack**: `XACK`.
//! - **Dead-letter**: `XADD {dead_letter_key} *` with `reason`,
//!   `original_message_id`, `delivery_count`, `failed_at` and `body` fields.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadReply};
use tracing::{debug, instrument, warn};

use super::{JobQueue, MessageId, QueueError, QueueMessage};
use crate::jobs::dead_letter::{DeadLetterRecord, DeadLetterReason, DeadLetterSink};

const DEFAULT_STREAM_KEY: &str = "evalhub:jobs";
const DEFAULT_DEAD_LETTER_KEY: &str = "evalhub:jobs:deadletter";
const DEFAULT_GROUP: &str = "evaluators";

#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub url: String,
    pub stream_key: String,
    pub dead_letter_key: String,
    pub group: String,
    /// Consumer name within the group; unique per process.
    pub consumer: String,
    pub visibility_timeout: Duration,
}

impl RedisStreamsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            dead_letter_key: DEFAULT_DEAD_LETTER_KEY.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: format!("evaluator-{}", uuid::Uuid::now_v7()),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisStreamsQueue {
    client: redis::Client,
    config: RedisStreamsConfig,
}

fn unavailable(op: &str, err: redis::RedisError) -> QueueError {
    QueueError::Unavailable(format!("{op} failed: {err}"))
}

impl RedisStreamsQueue {
    pub fn new(config: RedisStreamsConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| unavailable("connect", e))?;
        Ok(Self { client, config })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| unavailable("connect", e))
    }

    fn idle_ms(&self) -> u64 {
        self.config.visibility_timeout.as_millis() as u64
    }

    /// Create the consumer group (and the stream) if missing. Idempotent.
    pub async fn ensure_consumer_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(unavailable("XGROUP CREATE", e)),
        }
    }

    /// Take over one entry another delivery left idle past the visibility timeout.
    async fn reclaim_idle(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg("IDLE")
            .arg(self.idle_ms())
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| unavailable("XPENDING", e))?;

        let Some(entry) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.idle_ms())
            .arg(&entry.id)
            .query_async(conn)
            .await
            .map_err(|e| unavailable("XCLAIM", e))?;

        match claimed.ids.into_iter().next() {
            Some(stream_id) => {
                let delivery_count = entry.times_delivered as u32 + 1;
                debug!(message_id = %entry.id, delivery_count, "reclaimed idle message");
                Ok(Some(to_message(stream_id, delivery_count)))
            }
            // Another consumer won the claim, or the entry was trimmed.
            None => Ok(None),
        }
    }

    async fn read_new(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(&self.config.stream_key)
            .arg(">")
            .query_async(conn)
            .await
            .map_err(|e| unavailable("XREADGROUP", e))?;

        Ok(reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next())
            .map(|stream_id| to_message(stream_id, 1)))
    }
}

fn to_message(stream_id: StreamId, delivery_count: u32) -> QueueMessage {
    // A missing body surfaces as an empty payload and is dead-lettered as malformed.
    let body = stream_id.get::<String>("body").unwrap_or_default();
    QueueMessage {
        id: MessageId(stream_id.id.clone()),
        receipt: stream_id.id,
        body,
        delivery_count,
    }
}

#[async_trait]
impl JobQueue for RedisStreamsQueue {
    #[instrument(skip(self, body), fields(stream_key = %self.config.stream_key), err)]
    async fn enqueue(&self, body: String) -> Result<MessageId, QueueError> {
        let mut conn = self.conn().await?;
        let id: String = redis::cmd("XADD")
            .arg(&self.config.stream_key)
            .arg("*")
            .arg("body")
            .arg(&body)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("XADD", e))?;
        Ok(MessageId(id))
    }

    #[instrument(skip(self), fields(stream_key = %self.config.stream_key), err)]
    async fn dequeue(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut conn = self.conn().await?;
        if let Some(message) = self.reclaim_idle(&mut conn).await? {
            return Ok(Some(message));
        }
        self.read_new(&mut conn).await
    }

    #[instrument(skip(self, message), fields(message_id = %message.id), err)]
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let acked: u64 = redis::cmd("XACK")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(&message.receipt)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("XACK", e))?;

        if acked == 0 {
            warn!(message_id = %message.id, "ack for message no longer pending");
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for RedisStreamsQueue {
    #[instrument(
        skip(self, record),
        fields(message_id = %record.message_id, reason = record.reason.label()),
        err
    )]
    async fn dead_letter(&self, record: DeadLetterRecord) -> Result<(), QueueError> {
        let reason = serde_json::to_string(&record.reason)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let mut conn = self.conn().await?;
        let _: String = redis::cmd("XADD")
            .arg(&self.config.dead_letter_key)
            .arg("*")
            .arg("reason")
            .arg(&reason)
            .arg("original_message_id")
            .arg(&record.message_id.0)
            .arg("delivery_count")
            .arg(record.delivery_count)
            .arg("failed_at")
            .arg(record.failed_at.to_rfc3339())
            .arg("body")
            .arg(&record.body)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("dead-letter XADD", e))?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        let mut conn = self.conn().await?;
        let range: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(&self.config.dead_letter_key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("XREVRANGE", e))?;

        range.ids.iter().map(parse_dead_letter).collect()
    }
}

fn parse_dead_letter(entry: &StreamId) -> Result<DeadLetterRecord, QueueError> {
    let field = |name: &str| {
        entry
            .get::<String>(name)
            .ok_or_else(|| QueueError::Serialization(format!("dead letter {} missing {name}", entry.id)))
    };

    let reason: DeadLetterReason = serde_json::from_str(&field("reason")?)
        .map_err(|e| QueueError::Serialization(e.to_string()))?;
    let delivery_count = field("delivery_count")?
        .parse()
        .map_err(|e| QueueError::Serialization(format!("delivery_count: {e}")))?;
    let failed_at = DateTime::parse_from_rfc3339(&field("failed_at")?)
        .map_err(|e| QueueError::Serialization(format!("failed_at: {e}")))?
        .with_timezone(&Utc);

    Ok(DeadLetterRecord {
        reason,
        message_id: MessageId(field("original_message_id")?),
        delivery_count,
        body: field("body")?,
        failed_at,
    })
}
