//! `scout-queue`
//!
//! **Responsibility:** the durable hand-off between pipeline stages.
//!
//! - `message`: the two JSON message shapes (raw and completed)
//! - `transport`: the at-least-once queue contract (`QueueTransport`/`QueueConsumer`)
//! - `in_memory`: a process-local transport for tests and single-process dev
//!
//! Broker-backed transports live in `scout-infra`.

pub mod error;
pub mod in_memory;
pub mod message;
pub mod transport;

pub use error::TransportError;
pub use in_memory::{DeadLetter, InMemoryTransport};
pub use message::{CompletedStatus, CompletedTaskMessage, QueueMessage, RawTaskMessage};
pub use transport::{publish_message, Delivery, QueueConsumer, QueueTransport};
