//! Wire messages exchanged between stages.
//!
//! Both messages are JSON with camelCase field names. Field names are part of
//! the wire contract; rename with care.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use scout_core::{Task, TaskId};

use crate::error::TransportError;

/// A message that travels over a queue, keyed by the task it concerns.
pub trait QueueMessage: Serialize + DeserializeOwned + Send + Sync {
    fn task_id(&self) -> TaskId;

    fn encode(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    fn decode(payload: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(payload).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

/// Work request published by submission and retry; consumed by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTaskMessage {
    pub task_id: TaskId,
    pub identity: String,
    pub query_text: String,
    pub requested_at: DateTime<Utc>,
}

impl RawTaskMessage {
    pub fn for_task(task: &Task, requested_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id(),
            identity: task.identity().to_string(),
            query_text: task.query_text().to_string(),
            requested_at,
        }
    }
}

impl QueueMessage for RawTaskMessage {
    fn task_id(&self) -> TaskId {
        self.task_id
    }
}

/// Outcome carried on the completed queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletedStatus {
    Done,
    Failed,
}

/// Outcome published by the worker; consumed by the delivery stage.
///
/// For a failed task `short_result` holds a fixed notice and `full_result`
/// the error text, so the delivery stage can forward either outcome unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTaskMessage {
    pub task_id: TaskId,
    pub identity: String,
    pub status: CompletedStatus,
    pub short_result: String,
    pub full_result: String,
    pub completed_at: DateTime<Utc>,
}

impl QueueMessage for CompletedTaskMessage {
    fn task_id(&self) -> TaskId {
        self.task_id
    }
}
