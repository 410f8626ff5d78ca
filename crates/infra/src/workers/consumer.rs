//! Consumer pool: `slots` independent loops feeding one [`MessageHandler`].
//!
//! Each slot:
//! - opens its own transport consumer
//! - handles one message at a time, then acks or rejects it
//! - on connection loss backs off (exponential, capped), reconnects and resumes
//! - stops on cancellation, after the message in hand
//!
//! A slot never exits because of a handler or transport error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scout_queue::{Delivery, QueueConsumer, QueueTransport};

use crate::pipeline::{Disposition, MessageHandler};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Name for logging; slot consumers are named `{name}-{slot}`.
    pub name: String,
    pub queue: String,
    pub slots: usize,
    /// How long one `next` call may block waiting for a message.
    pub poll_interval: Duration,
    /// Backoff between reconnect attempts.
    pub reconnect: RetryPolicy,
}

impl ConsumerConfig {
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            slots: 1,
            poll_interval: Duration::from_millis(500),
            reconnect: RetryPolicy::exponential(u32::MAX, Duration::from_millis(200), Duration::from_secs(30)),
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_reconnect(mut self, reconnect: RetryPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    transport_errors: AtomicU64,
    reconnects: AtomicU64,
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub received: u64,
    pub handled: u64,
    /// Acknowledged after a handler-reported failure (e.g. exhausted delivery).
    pub failed: u64,
    pub rejected: u64,
    pub transport_errors: u64,
    pub reconnects: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct PoolHandle {
    cancel: CancellationToken,
    slots: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
    started: Instant,
}

impl PoolHandle {
    pub fn stats(&self) -> PoolStats {
        let c = &self.counters;
        PoolStats {
            received: c.received.load(Ordering::Relaxed),
            handled: c.handled.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            transport_errors: c.transport_errors.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Request graceful shutdown and wait for every slot to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for slot in self.slots {
            let _ = slot.await;
        }
    }
}

#[derive(Debug)]
pub struct ConsumerPool;

impl ConsumerPool {
    /// Spawn `config.slots` consumer loops on the current tokio runtime.
    ///
    /// `cancel` may be shared with other pools; cancelling it stops them all.
    pub fn spawn(
        transport: Arc<dyn QueueTransport>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
        cancel: CancellationToken,
    ) -> PoolHandle {
        let counters = Arc::new(Counters::default());
        let config = Arc::new(config);

        let slots = (0..config.slots.max(1))
            .map(|slot| {
                tokio::spawn(slot_loop(
                    slot,
                    Arc::clone(&transport),
                    Arc::clone(&handler),
                    Arc::clone(&config),
                    cancel.clone(),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        info!(pool = %config.name, queue = %config.queue, slots = config.slots, "consumer pool started");

        PoolHandle {
            cancel,
            slots,
            counters,
            started: Instant::now(),
        }
    }
}

async fn slot_loop(
    slot: usize,
    transport: Arc<dyn QueueTransport>,
    handler: Arc<dyn MessageHandler>,
    config: Arc<ConsumerConfig>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) {
    let consumer_name = format!("{}-{}", config.name, slot);
    let mut failures: u32 = 0;

    'connect: while !cancel.is_cancelled() {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break 'connect,
            opened = transport.consumer(&config.queue, &consumer_name) => opened,
        };
        let mut consumer = match opened {
            Ok(consumer) => {
                if failures > 0 {
                    counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(consumer = %consumer_name, queue = %config.queue, "consumer reconnected");
                }
                failures = 0;
                consumer
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                let delay = config.reconnect.delay_for_attempt(failures);
                warn!(consumer = %consumer_name, attempt = failures, ?delay, error = %err, "failed to open consumer");
                if pause(&cancel, delay).await {
                    break 'connect;
                }
                continue 'connect;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'connect,
                next = consumer.next(config.poll_interval) => next,
            };

            match next {
                Ok(None) => {}
                Ok(Some(delivery)) => {
                    counters.received.fetch_add(1, Ordering::Relaxed);
                    handle_one(&consumer_name, consumer.as_mut(), &handler, delivery, &counters).await;
                }
                Err(err) if err.is_connection() => {
                    failures = failures.saturating_add(1);
                    counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = config.reconnect.delay_for_attempt(failures);
                    warn!(consumer = %consumer_name, ?delay, error = %err, "transport connection lost; reconnecting");
                    if pause(&cancel, delay).await {
                        break 'connect;
                    }
                    continue 'connect;
                }
                Err(err) => {
                    counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(consumer = %consumer_name, error = %err, "transport read failed");
                    if pause(&cancel, config.poll_interval).await {
                        break 'connect;
                    }
                }
            }
        }
    }

    debug!(consumer = %consumer_name, "consumer slot stopped");
}

/// Sleep for `delay` unless cancelled first. Returns `true` when cancelled.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

async fn handle_one(
    consumer_name: &str,
    consumer: &mut dyn QueueConsumer,
    handler: &Arc<dyn MessageHandler>,
    delivery: Delivery,
    counters: &Counters,
) {
    // Run the handler on its own task so a panic is contained to this message.
    let task_handler = Arc::clone(handler);
    let task_delivery = delivery.clone();
    let disposition = match tokio::spawn(async move { task_handler.handle(&task_delivery).await }).await {
        Ok(disposition) => disposition,
        Err(join_err) => Disposition::Reject(format!("handler panicked: {join_err}")),
    };

    let settled = match &disposition {
        Disposition::Handled => {
            counters.handled.fetch_add(1, Ordering::Relaxed);
            consumer.ack(&delivery).await
        }
        Disposition::Failed(reason) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            debug!(consumer = %consumer_name, stage = handler.name(), %reason, "message failed; acknowledging");
            consumer.ack(&delivery).await
        }
        Disposition::Reject(reason) => {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(consumer = %consumer_name, stage = handler.name(), key = %delivery.key, %reason, "message rejected");
            consumer.reject(&delivery, reason).await
        }
    };

    if let Err(err) = settled {
        // The transport will hand the message out again; handlers are idempotent.
        counters.transport_errors.fetch_add(1, Ordering::Relaxed);
        warn!(consumer = %consumer_name, key = %delivery.key, error = %err, "failed to settle message");
    }
}
