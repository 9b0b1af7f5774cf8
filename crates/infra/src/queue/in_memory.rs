use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{JobQueue, MessageId, QueueError, QueueMessage};

#[derive(Debug)]
struct Entry {
    id: MessageId,
    body: String,
    delivery_count: u32,
    lease: u64,
    invisible_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<Entry>,
    next_id: u64,
}

/// In-memory queue for tests/dev.
///
/// FIFO among visible messages. Uses `tokio::time` so tests can drive the
/// visibility timeout with a paused clock.
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            visibility_timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages not yet acknowledged (visible or in flight).
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently leased to a consumer.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.state()
            .entries
            .iter()
            .filter(|e| e.invisible_until.is_some_and(|t| t > now))
            .count()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, body: String) -> Result<MessageId, QueueError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = MessageId(format!("mem-{}", state.next_id));
        state.entries.push(Entry {
            id: id.clone(),
            body,
            delivery_count: 0,
            lease: 0,
            invisible_until: None,
        });
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut state = self.state();

        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.invisible_until.is_none_or(|t| t <= now))
        else {
            return Ok(None);
        };

        entry.delivery_count += 1;
        entry.lease += 1;
        entry.invisible_until = Some(now + self.visibility_timeout);

        Ok(Some(QueueMessage {
            id: entry.id.clone(),
            receipt: entry.lease.to_string(),
            body: entry.body.clone(),
            delivery_count: entry.delivery_count,
        }))
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state();
        let pos = state
            .entries
            .iter()
            .position(|e| e.id == message.id && e.lease.to_string() == message.receipt)
            .ok_or_else(|| QueueError::LeaseExpired(message.id.clone()))?;
        state.entries.remove(pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dequeue_hides_message_until_ack() {
        let q = InMemoryQueue::new(Duration::from_secs(30));
        q.enqueue("a".into()).await.unwrap();

        let msg = q.dequeue().await.unwrap().unwrap();
        assert_eq!(msg.body, "a");
        assert_eq!(msg.delivery_count, 1);
        assert!(q.dequeue().await.unwrap().is_none());
        assert_eq!(q.in_flight(), 1);

        q.ack(&msg).await.unwrap();
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        let q = InMemoryQueue::new(Duration::from_secs(30));
        q.enqueue("a".into()).await.unwrap();

        let first = q.dequeue().await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        let second = q.dequeue().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.delivery_count, 2);

        // The first lease is gone.
        assert!(matches!(q.ack(&first).await, Err(QueueError::LeaseExpired(_))));
        q.ack(&second).await.unwrap();
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn preserves_fifo_order_among_visible_messages() {
        let q = InMemoryQueue::new(Duration::from_secs(30));
        for body in ["1", "2", "3"] {
            q.enqueue(body.into()).await.unwrap();
        }
        let mut seen = Vec::new();
        while let Some(m) = q.dequeue().await.unwrap() {
            seen.push(m.body);
        }
        assert_eq!(seen, vec!["1", "2", "3"]);
    }
}
