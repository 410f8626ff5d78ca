//! In-memory queue transport for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::transport::{Delivery, QueueConsumer, QueueTransport};

/// A rejected message kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub key: String,
    pub payload: Vec<u8>,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Entry {
    tag: u64,
    key: String,
    payload: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Entry>,
    in_flight: HashMap<u64, Entry>,
    dead_letters: Vec<DeadLetter>,
}

#[derive(Debug, Default)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    unavailable: AtomicBool,
    next_tag: AtomicU64,
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, QueueState>>, TransportError> {
        self.queues
            .lock()
            .map_err(|_| TransportError::Command("queue state lock poisoned".to_string()))
    }

    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("in-memory transport offline".to_string()));
        }
        Ok(())
    }
}

/// Process-local transport.
///
/// - FIFO per queue, no persistence
/// - unacked messages stay in flight until [`InMemoryTransport::requeue_unacked`]
///   (the stand-in for a broker's visibility timeout)
/// - can be switched offline to exercise failure paths
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Move every unacknowledged message of `queue` back to the head of the
    /// queue, flagged as redelivered. Returns how many were moved.
    pub fn requeue_unacked(&self, queue: &str) -> usize {
        let Ok(mut queues) = self.inner.lock() else {
            return 0;
        };
        let state = queues.entry(queue.to_string()).or_default();

        let mut pending: Vec<Entry> = state.in_flight.drain().map(|(_, e)| e).collect();
        pending.sort_by_key(|e| std::cmp::Reverse(e.tag));
        let moved = pending.len();
        for entry in pending {
            state.ready.push_front(entry);
        }
        drop(queues);

        self.inner.notify.notify_waiters();
        moved
    }

    /// Messages waiting to be consumed.
    pub fn depth(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .map(|q| q.get(queue).map_or(0, |s| s.ready.len()))
            .unwrap_or(0)
    }

    /// Messages handed out and not yet acked or rejected.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .map(|q| q.get(queue).map_or(0, |s| s.in_flight.len()))
            .unwrap_or(0)
    }

    pub fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.inner
            .lock()
            .map(|q| q.get(queue).map(|s| s.dead_letters.clone()).unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn publish(&self, queue: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.inner.ensure_available()?;

        let tag = self.inner.next_tag.fetch_add(1, Ordering::SeqCst);
        {
            let mut queues = self.inner.lock()?;
            queues.entry(queue.to_string()).or_default().ready.push_back(Entry {
                tag,
                key: key.to_string(),
                payload: payload.to_vec(),
                deliveries: 0,
            });
        }

        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn consumer(
        &self,
        queue: &str,
        _consumer: &str,
    ) -> Result<Box<dyn QueueConsumer>, TransportError> {
        self.inner.ensure_available()?;
        Ok(Box::new(InMemoryConsumer {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
        }))
    }
}

struct InMemoryConsumer {
    inner: Arc<Inner>,
    queue: String,
}

impl InMemoryConsumer {
    fn try_take(&self) -> Result<Option<Delivery>, TransportError> {
        self.inner.ensure_available()?;

        let mut queues = self.inner.lock()?;
        let state = queues.entry(self.queue.clone()).or_default();
        let Some(mut entry) = state.ready.pop_front() else {
            return Ok(None);
        };

        entry.deliveries += 1;
        let delivery = Delivery {
            tag: entry.tag.to_string(),
            key: entry.key.clone(),
            payload: entry.payload.clone(),
            redelivered: entry.deliveries > 1,
        };
        state.in_flight.insert(entry.tag, entry);
        Ok(Some(delivery))
    }

    fn settle(&self, delivery: &Delivery) -> Result<Option<Entry>, TransportError> {
        self.inner.ensure_available()?;

        let tag: u64 = delivery
            .tag
            .parse()
            .map_err(|_| TransportError::Command(format!("unknown delivery tag {}", delivery.tag)))?;
        let mut queues = self.inner.lock()?;
        Ok(queues
            .get_mut(&self.queue)
            .and_then(|state| state.in_flight.remove(&tag)))
    }
}

#[async_trait]
impl QueueConsumer for InMemoryConsumer {
    async fn next(&mut self, wait: Duration) -> Result<Option<Delivery>, TransportError> {
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before checking so a concurrent publish is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        // Acking a tag that was already settled (or requeued) is a no-op.
        self.settle(delivery)?;
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery, reason: &str) -> Result<(), TransportError> {
        if self.settle(delivery)?.is_none() {
            return Ok(());
        }

        let mut queues = self.inner.lock()?;
        queues
            .entry(self.queue.clone())
            .or_default()
            .dead_letters
            .push(DeadLetter {
                key: delivery.key.clone(),
                payload: delivery.payload.clone(),
                reason: reason.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: &str = "raw";
    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn delivers_in_publish_order_and_acks() {
        let transport = InMemoryTransport::new();
        transport.publish(Q, "a", b"1").await.unwrap();
        transport.publish(Q, "b", b"2").await.unwrap();

        let mut consumer = transport.consumer(Q, "c1").await.unwrap();
        let first = consumer.next(SHORT).await.unwrap().unwrap();
        let second = consumer.next(SHORT).await.unwrap().unwrap();
        assert_eq!(first.payload, b"1");
        assert_eq!(second.payload, b"2");
        assert_eq!(transport.in_flight(Q), 2);

        consumer.ack(&first).await.unwrap();
        consumer.ack(&second).await.unwrap();
        assert_eq!(transport.in_flight(Q), 0);
        assert!(consumer.next(SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unacked_messages_are_redelivered() {
        let transport = InMemoryTransport::new();
        transport.publish(Q, "a", b"1").await.unwrap();

        let mut consumer = transport.consumer(Q, "c1").await.unwrap();
        let first = consumer.next(SHORT).await.unwrap().unwrap();
        assert!(!first.redelivered);

        assert_eq!(transport.requeue_unacked(Q), 1);
        let again = consumer.next(SHORT).await.unwrap().unwrap();
        assert!(again.redelivered);
        assert_eq!(again.payload, first.payload);
    }

    #[tokio::test]
    async fn reject_moves_to_dead_letters() {
        let transport = InMemoryTransport::new();
        transport.publish(Q, "a", b"junk").await.unwrap();

        let mut consumer = transport.consumer(Q, "c1").await.unwrap();
        let delivery = consumer.next(SHORT).await.unwrap().unwrap();
        consumer.reject(&delivery, "malformed").await.unwrap();

        let dead = transport.dead_letters(Q);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "malformed");
        assert_eq!(transport.depth(Q), 0);
        assert_eq!(transport.in_flight(Q), 0);
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_publish() {
        let transport = InMemoryTransport::new();
        let mut consumer = transport.consumer(Q, "c1").await.unwrap();

        let publisher = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(Q, "a", b"late").await.unwrap();
        });

        let delivery = consumer.next(Duration::from_secs(2)).await.unwrap();
        assert_eq!(delivery.unwrap().payload, b"late");
    }

    #[tokio::test]
    async fn offline_transport_reports_connection_errors() {
        let transport = InMemoryTransport::new();
        let mut consumer = transport.consumer(Q, "c1").await.unwrap();
        transport.set_available(false);

        assert!(transport.publish(Q, "a", b"1").await.unwrap_err().is_connection());
        assert!(consumer.next(SHORT).await.unwrap_err().is_connection());

        transport.set_available(true);
        transport.publish(Q, "a", b"1").await.unwrap();
        assert!(consumer.next(SHORT).await.unwrap().is_some());
    }
}
