use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};

use scout_core::{DomainError, Task, TaskId};
use scout_queue::{publish_message, QueueTransport, RawTaskMessage};

use crate::store::{StoreError, TaskStore};

use super::PipelineError;

/// Re-runs a finished task under the same id.
#[derive(Clone)]
pub struct RetryStage {
    store: Arc<dyn TaskStore>,
    transport: Arc<dyn QueueTransport>,
    raw_queue: String,
}

impl RetryStage {
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

    /// Reset a `Done`/`Failed` task to `Queued` and enqueue it again.
    ///
    /// The reset is conditional on the status read just before, so of two
    /// concurrent retries exactly one succeeds; the other sees `Conflict`.
    #[instrument(skip(self), fields(task_id = %id), err)]
    pub async fn retry(&self, id: TaskId) -> Result<Task, PipelineError> {
        let mut task = self
            .store
            .get(id)
            .await?
            .ok_or(DomainError::NotFound)?;

        let observed = task.status();
        task.reset_for_retry(Utc::now())?;

        match self.store.update(&task, observed).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(DomainError::conflict("task still in progress").into());
            }
            Err(StoreError::NotFound(_)) => return Err(DomainError::NotFound.into()),
            Err(other) => return Err(other.into()),
        }

        let message = RawTaskMessage::for_task(&task, task.updated_at());
        if let Err(err) = publish_message(self.transport.as_ref(), &self.raw_queue, &message).await {
            error!(
                task_id = %id,
                queue = %self.raw_queue,
                error = %err,
                "enqueue failed after reset; task left queued without a message"
            );
            return Err(err.into());
        }

        info!(task_id = %id, previous = %observed, "task requeued");
        Ok(task)
    }
}
