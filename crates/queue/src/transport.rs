//! Queue transport abstraction (mechanics only).
//!
//! The transport moves opaque payloads between stages with **at-least-once**
//! semantics:
//!
//! - a delivered message stays owned by its consumer until `ack` or `reject`
//! - an unacknowledged message is eventually handed to another consumer
//!   (redelivery), so handlers must be idempotent
//! - `reject` never requeues; the payload is kept aside as a dead letter
//!
//! Queues are named by plain strings so deployments can choose their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::QueueMessage;

/// A message handed to a consumer, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-specific handle used to ack/reject this delivery.
    pub tag: String,
    /// Routing key supplied at publish time (the task id).
    pub key: String,
    pub payload: Vec<u8>,
    /// `true` when this message was handed out before and never acknowledged.
    pub redelivered: bool,
}

/// Publishing side of a transport, shared by every stage.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Durably append `payload` to `queue`.
    async fn publish(&self, queue: &str, key: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Open a consumer on `queue`. `consumer` names the slot (used by brokers
    /// that track ownership per consumer).
    async fn consumer(
        &self,
        queue: &str,
        consumer: &str,
    ) -> Result<Box<dyn QueueConsumer>, TransportError>;
}

/// One consumer slot. Deliveries on a slot are handled strictly in sequence.
#[async_trait]
pub trait QueueConsumer: Send {
    /// Wait up to `wait` for the next message.
    async fn next(&mut self, wait: Duration) -> Result<Option<Delivery>, TransportError>;

    /// Acknowledge successful handling; the message is gone for good.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Drop the message without requeue, keeping it aside with `reason`.
    async fn reject(&mut self, delivery: &Delivery, reason: &str) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> QueueTransport for Arc<T>
where
    T: QueueTransport + ?Sized,
{
    async fn publish(&self, queue: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        (**self).publish(queue, key, payload).await
    }

    async fn consumer(
        &self,
        queue: &str,
        consumer: &str,
    ) -> Result<Box<dyn QueueConsumer>, TransportError> {
        (**self).consumer(queue, consumer).await
    }
}

/// Encode `message` and publish it keyed by its task id.
pub async fn publish_message<M: QueueMessage>(
    transport: &dyn QueueTransport,
    queue: &str,
    message: &M,
) -> Result<(), TransportError> {
    let payload = message.encode()?;
    let key = message.task_id().to_string();
    transport.publish(queue, &key, &payload).await
}
