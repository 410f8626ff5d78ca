//! In-memory task store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scout_core::{DeliveryRecord, PageRequest, Task, TaskId, TaskStatus};

use super::{StoreError, TaskPage, TaskStore};

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    deliveries: RwLock<Vec<DeliveryRecord>>,
}

fn poisoned() -> StoreError {
    StoreError::Database("in-memory store lock poisoned".to_string())
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn tasks(&self) -> Result<RwLockReadGuard<'_, HashMap<TaskId, Task>>, StoreError> {
        self.tasks.read().map_err(|_| poisoned())
    }

    fn tasks_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<TaskId, Task>>, StoreError> {
        self.tasks.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks_mut()?;
        if tasks.contains_key(&task.id()) {
            return Err(StoreError::Conflict(format!("task {} already exists", task.id())));
        }
        tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks()?.get(&id).cloned())
    }

    async fn list(
        &self,
        status: Option<TaskStatus>,
        page: PageRequest,
    ) -> Result<TaskPage, StoreError> {
        let tasks = self.tasks()?;
        let mut matching: Vec<&Task> = tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status() == s))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();

        Ok(TaskPage { items, total })
    }

    async fn update(&self, task: &Task, expected: TaskStatus) -> Result<(), StoreError> {
        let mut tasks = self.tasks_mut()?;
        let current = tasks.get_mut(&task.id()).ok_or(StoreError::NotFound(task.id()))?;
        if current.status() != expected {
            return Err(StoreError::Conflict(format!(
                "task {} is {}, expected {}",
                task.id(),
                current.status(),
                expected
            )));
        }
        *current = task.clone();
        Ok(())
    }

    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let mut deliveries = self.deliveries.write().map_err(|_| poisoned())?;
        let duplicate = deliveries
            .iter()
            .any(|d| d.task_id == record.task_id && d.completed_at == record.completed_at);
        if !duplicate {
            deliveries.push(record.clone());
        }
        Ok(())
    }

    async fn has_delivery(
        &self,
        task_id: TaskId,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let deliveries = self.deliveries.read().map_err(|_| poisoned())?;
        Ok(deliveries
            .iter()
            .any(|d| d.task_id == task_id && d.completed_at == completed_at))
    }

    async fn deliveries(&self, task_id: TaskId) -> Result<Vec<DeliveryRecord>, StoreError> {
        let deliveries = self.deliveries.read().map_err(|_| poisoned())?;
        Ok(deliveries
            .iter()
            .filter(|d| d.task_id == task_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn task_at(offset_secs: i64) -> Task {
        Task::submit("u1", "hello", Utc::now() + Duration::seconds(offset_secs)).unwrap()
    }

    #[tokio::test]
    async fn lists_newest_first_with_paging() {
        let store = InMemoryTaskStore::new();
        for i in 0..25 {
            store.insert(&task_at(i)).await.unwrap();
        }

        let first = store.list(None, PageRequest::new(1, 20).unwrap()).await.unwrap();
        let second = store.list(None, PageRequest::new(2, 20).unwrap()).await.unwrap();

        assert_eq!(first.total, 25);
        assert_eq!(first.items.len(), 20);
        assert_eq!(second.items.len(), 5);
        assert!(first.items[0].created_at() > first.items[1].created_at());
        assert!(first.items[19].created_at() > second.items[0].created_at());
    }

    #[tokio::test]
    async fn filters_by_status() {
        let store = InMemoryTaskStore::new();
        let mut started = task_at(0);
        store.insert(&started).await.unwrap();
        store.insert(&task_at(1)).await.unwrap();

        started.begin_processing(Utc::now());
        store.update(&started, TaskStatus::Queued).await.unwrap();

        let page = store
            .list(Some(TaskStatus::Processing), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id(), started.id());
    }

    #[tokio::test]
    async fn update_is_a_compare_and_set_on_status() {
        let store = InMemoryTaskStore::new();
        let mut task = task_at(0);
        store.insert(&task).await.unwrap();

        task.begin_processing(Utc::now());
        assert!(matches!(
            store.update(&task, TaskStatus::Done).await,
            Err(StoreError::Conflict(_))
        ));
        store.update(&task, TaskStatus::Queued).await.unwrap();

        let unknown = task_at(1);
        assert_eq!(
            store.update(&unknown, TaskStatus::Queued).await,
            Err(StoreError::NotFound(unknown.id()))
        );
    }

    #[tokio::test]
    async fn duplicate_delivery_records_collapse() {
        let store = InMemoryTaskStore::new();
        let task = task_at(0);
        let completed_at = Utc::now();
        let record = DeliveryRecord {
            task_id: task.id(),
            identity: "u1".into(),
            short_result: "s".into(),
            full_result: "f".into(),
            completed_at,
            delivered_at: Utc::now(),
        };

        store.record_delivery(&record).await.unwrap();
        store.record_delivery(&record).await.unwrap();

        assert!(store.has_delivery(task.id(), completed_at).await.unwrap());
        assert_eq!(store.deliveries(task.id()).await.unwrap().len(), 1);
    }
}
