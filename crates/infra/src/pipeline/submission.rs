use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};

use scout_core::Task;
use scout_queue::{publish_message, QueueTransport, RawTaskMessage};

use crate::store::TaskStore;

use super::PipelineError;

/// Creates tasks and hands them to the worker.
#[derive(Clone)]
pub struct SubmissionStage {
    store: Arc<dyn TaskStore>,
    transport: Arc<dyn QueueTransport>,
    raw_queue: String,
}

impl SubmissionStage {
    pub fn new(
        store: Arc<dyn TaskStore>,
        transport: Arc<dyn QueueTransport>,
        raw_queue: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            raw_queue: raw_queue.into(),
        }
    }

    /// Validate, persist a `Queued` task, then enqueue its raw message.
    ///
    /// The row is written before the enqueue. If the enqueue fails the caller
    /// gets a transport error and the row stays `Queued` without a message.
    #[instrument(skip(self, query_text), fields(queue = %self.raw_queue), err)]
    pub async fn submit(&self, identity: &str, query_text: &str) -> Result<Task, PipelineError> {
        let now = Utc::now();
        let task = Task::submit(identity.trim(), query_text.trim(), now)?;
        self.store.insert(&task).await?;

        let message = RawTaskMessage::for_task(&task, now);
        if let Err(err) = publish_message(self.transport.as_ref(), &self.raw_queue, &message).await {
            error!(
                task_id = %task.id(),
                queue = %self.raw_queue,
                error = %err,
                "enqueue failed after insert; task left queued without a message"
            );
            return Err(err.into());
        }

        info!(task_id = %task.id(), "task submitted");
        Ok(task)
    }
}
