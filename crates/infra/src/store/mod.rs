//! Task storage: the single source of truth for task state.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scout_core::{DeliveryRecord, PageRequest, Task, TaskId, TaskStatus};

/// Store-level error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A conditional write lost against a concurrent writer, or an insert hit
    /// an existing key.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// A stored row could not be turned back into a domain value.
    #[error("failed to decode stored row: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(String),
}

/// One page of a listing plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: u64,
}

/// Task storage abstraction.
///
/// Every state change is written with [`TaskStore::update`], a compare-and-set
/// on the status the caller last observed. Two writers racing on the same task
/// cannot both win.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a freshly submitted task.
    async fn insert(&self, task: &Task) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Newest first, optionally filtered by status.
    async fn list(
        &self,
        status: Option<TaskStatus>,
        page: PageRequest,
    ) -> Result<TaskPage, StoreError>;

    /// Persist `task` if the stored row still has status `expected`.
    ///
    /// Fails with `NotFound` when the row is gone and `Conflict` when its
    /// status moved on.
    async fn update(&self, task: &Task, expected: TaskStatus) -> Result<(), StoreError>;

    /// Append a delivery record. Recording the same `(task_id, completed_at)`
    /// twice keeps a single row.
    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError>;

    /// Whether the completion cycle `completed_at` of `task_id` was delivered.
    async fn has_delivery(
        &self,
        task_id: TaskId,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// All deliveries of a task, oldest first.
    async fn deliveries(&self, task_id: TaskId) -> Result<Vec<DeliveryRecord>, StoreError>;
}

#[async_trait]
impl<T> TaskStore for Arc<T>
where
    T: TaskStore + ?Sized,
{
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        (**self).insert(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        (**self).get(id).await
    }

    async fn list(
        &self,
        status: Option<TaskStatus>,
        page: PageRequest,
    ) -> Result<TaskPage, StoreError> {
        (**self).list(status, page).await
    }

    async fn update(&self, task: &Task, expected: TaskStatus) -> Result<(), StoreError> {
        (**self).update(task, expected).await
    }

    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        (**self).record_delivery(record).await
    }

    async fn has_delivery(
        &self,
        task_id: TaskId,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).has_delivery(task_id, completed_at).await
    }

    async fn deliveries(&self, task_id: TaskId) -> Result<Vec<DeliveryRecord>, StoreError> {
        (**self).deliveries(task_id).await
    }
}
