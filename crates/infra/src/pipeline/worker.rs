use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use scout_core::{Task, TaskStatus};
use scout_queue::{
    publish_message, CompletedStatus, CompletedTaskMessage, Delivery, QueueMessage, QueueTransport,
    RawTaskMessage,
};
use scout_search::QueryEngine;

use crate::store::{StoreError, TaskStore};

use super::{Disposition, MessageHandler};

/// Short result sent for a task whose computation failed.
pub const FAILED_SHORT_RESULT: &str = "AI search failed";

/// Consumes raw messages, computes results and publishes the outcome.
///
/// The raw message is acknowledged only once the outcome is on the completed
/// queue. A crash before that leaves the message unacknowledged and the
/// transport hands it out again:
///
/// The result is always recomputed (the engine is pure). When a redelivered
/// task is already `Done`/`Failed` with that same outcome, the row is left
/// untouched and the completion keeps its `completed_at`, so the delivery
/// stage recognises the duplicate.
#[derive(Clone)]
pub struct WorkerStage {
    store: Arc<dyn TaskStore>,
    transport: Arc<dyn QueueTransport>,
    engine: Arc<dyn QueryEngine>,
    completed_queue: String,
}

/// Result of one persisted step: keep going, or stop with a disposition.
type Step<T> = Result<T, Disposition>;

impl WorkerStage {
    pub fn new(
        store: Arc<dyn TaskStore>,
        transport: Arc<dyn QueueTransport>,
        engine: Arc<dyn QueryEngine>,
        completed_queue: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            engine,
            completed_queue: completed_queue.into(),
        }
    }

    async fn save(&self, task: &Task, expected: TaskStatus) -> Step<()> {
        match self.store.update(task, expected).await {
            Ok(()) => Ok(()),
            // Someone else moved the task (a concurrent duplicate, or a retry
            // that already enqueued fresh work). Their message carries on.
            Err(StoreError::Conflict(reason)) => {
                warn!(task_id = %task.id(), %reason, "task changed concurrently; dropping this delivery");
                Err(Disposition::Handled)
            }
            Err(err) => Err(Disposition::Reject(format!("store update failed: {err}"))),
        }
    }

    async fn process(&self, message: RawTaskMessage) -> Step<CompletedTaskMessage> {
        let mut task = match self.store.get(message.task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return Err(Disposition::Reject("unknown task".to_string())),
            Err(err) => return Err(Disposition::Reject(format!("store read failed: {err}"))),
        };

        if task.begin_processing(Utc::now()) {
            self.save(&task, TaskStatus::Queued).await?;
        } else {
            debug!(task_id = %task.id(), status = %task.status(), "redelivered task; recomputing");
        }

        let observed = task.status();
        let previous = observed.is_terminal().then(|| task.clone());
        let now = Utc::now();
        let applied = match self.engine.compute(task.query_text()) {
            Ok(result) => task.complete(result.short, result.full, now),
            Err(err) => {
                warn!(task_id = %task.id(), error = %err, "computation failed");
                task.fail(err.to_string(), now)
            }
        };
        if let Err(err) = applied {
            return Err(Disposition::Reject(err.to_string()));
        }

        if let Some(previous) = previous.filter(|p| same_outcome(p, &task)) {
            return Ok(outcome(&previous));
        }
        self.save(&task, observed).await?;

        Ok(outcome(&task))
    }
}

fn same_outcome(a: &Task, b: &Task) -> bool {
    a.status() == b.status()
        && a.short_result() == b.short_result()
        && a.full_result() == b.full_result()
        && a.error() == b.error()
}

/// Completed message for a task in a terminal state.
fn outcome(task: &Task) -> CompletedTaskMessage {
    let (status, short_result, full_result) = match task.status() {
        TaskStatus::Done => (
            CompletedStatus::Done,
            task.short_result().unwrap_or_default().to_string(),
            task.full_result().unwrap_or_default().to_string(),
        ),
        _ => (
            CompletedStatus::Failed,
            FAILED_SHORT_RESULT.to_string(),
            task.error().unwrap_or_default().to_string(),
        ),
    };

    CompletedTaskMessage {
        task_id: task.id(),
        identity: task.identity().to_string(),
        status,
        short_result,
        full_result,
        completed_at: task.updated_at(),
    }
}

#[async_trait]
impl MessageHandler for WorkerStage {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message = match RawTaskMessage::decode(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(key = %delivery.key, error = %err, "malformed raw message");
                return Disposition::Reject(err.to_string());
            }
        };
        let task_id = message.task_id;

        let completed = match self.process(message).await {
            Ok(completed) => completed,
            Err(disposition) => return disposition,
        };

        if let Err(err) = publish_message(self.transport.as_ref(), &self.completed_queue, &completed).await {
            error!(%task_id, error = %err, "failed to enqueue completed message");
            return Disposition::Reject(format!("completed enqueue failed: {err}"));
        }

        info!(%task_id, status = ?completed.status, redelivered = delivery.redelivered, "task processed");
        Disposition::Handled
    }
}
