use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scout_core::{PageMeta, Task, TaskStatus};

// -------------------------
// Request DTOs
// -------------------------

/// Missing fields deserialize as blank and are rejected by validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubmitTaskRequest {
    pub identity: String,
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    #[serde(rename = "pageSize", alias = "page_size")]
    pub page_size: Option<u32>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeuedTask {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: String,
    pub identity: String,
    pub text: String,
    pub status: TaskStatus,
    pub short_result: Option<String>,
    pub full_result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id().to_string(),
            identity: task.identity().to_string(),
            text: task.query_text().to_string(),
            status: task.status(),
            short_result: task.short_result().map(str::to_string),
            full_result: task.full_result().map(str::to_string),
            error: task.error().map(str::to_string),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub data: Vec<TaskView>,
    pub meta: PageMeta,
}
