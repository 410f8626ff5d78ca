//! Postgres-backed task store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Database` |
//! | ColumnDecode / unknown status text | N/A | `Decode` |
//!
//! Every status change is a conditional `UPDATE … WHERE id = $1 AND status = $n`;
//! zero affected rows means the row vanished or another writer got there first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use scout_core::{DeliveryRecord, PageRequest, Task, TaskId, TaskRecord, TaskStatus};

use super::{StoreError, TaskPage, TaskStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS search_tasks (
        id UUID PRIMARY KEY,
        identity TEXT NOT NULL,
        query_text TEXT NOT NULL,
        status TEXT NOT NULL,
        short_result TEXT NULL,
        full_result TEXT NULL,
        error TEXT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS search_tasks_status_created_idx
        ON search_tasks (status, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_records (
        id BIGSERIAL PRIMARY KEY,
        task_id UUID NOT NULL REFERENCES search_tasks (id),
        identity TEXT NOT NULL,
        short_result TEXT NOT NULL,
        full_result TEXT NOT NULL,
        completed_at TIMESTAMPTZ NOT NULL,
        delivered_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS delivery_records_cycle_idx
        ON delivery_records (task_id, completed_at)
    "#,
];

const TASK_COLUMNS: &str =
    "id, identity, query_text, status, short_result, full_result, error, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: Arc<PgPool>,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url` and apply the schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn exists(&self, id: TaskId) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM search_tasks WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists", e))
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id()), err)]
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO search_tasks
                (id, identity, query_text, status, short_result, full_result, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(task.id().as_uuid())
        .bind(task.identity())
        .bind(task.query_text())
        .bind(task.status().as_str())
        .bind(task.short_result())
        .bind(task.full_result())
        .bind(task.error())
        .bind(task.created_at())
        .bind(task.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id), err)]
    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM search_tasks WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode_task).transpose()
    }

    #[instrument(
        skip(self),
        fields(page = page.page(), page_size = page.page_size(), returned = tracing::field::Empty),
        err
    )]
    async fn list(
        &self,
        status: Option<TaskStatus>,
        page: PageRequest,
    ) -> Result<TaskPage, StoreError> {
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM search_tasks WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_count", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM search_tasks
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        let items = rows.iter().map(decode_task).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("returned", items.len());

        Ok(TaskPage {
            items,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    #[instrument(
        skip(self, task),
        fields(task_id = %task.id(), from = %expected, to = %task.status()),
        err
    )]
    async fn update(&self, task: &Task, expected: TaskStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE search_tasks
            SET status = $2, short_result = $3, full_result = $4, error = $5, updated_at = $6
            WHERE id = $1 AND status = $7
            "#,
        )
        .bind(task.id().as_uuid())
        .bind(task.status().as_str())
        .bind(task.short_result())
        .bind(task.full_result())
        .bind(task.error())
        .bind(task.updated_at())
        .bind(expected.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        if self.exists(task.id()).await? {
            Err(StoreError::Conflict(format!(
                "task {} is no longer {expected}",
                task.id()
            )))
        } else {
            Err(StoreError::NotFound(task.id()))
        }
    }

    #[instrument(skip(self, record), fields(task_id = %record.task_id), err)]
    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_records
                (task_id, identity, short_result, full_result, completed_at, delivered_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (task_id, completed_at) DO NOTHING
            "#,
        )
        .bind(record.task_id.as_uuid())
        .bind(&record.identity)
        .bind(&record.short_result)
        .bind(&record.full_result)
        .bind(record.completed_at)
        .bind(record.delivered_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("record_delivery", e) {
            StoreError::NotFound(_) => StoreError::NotFound(record.task_id),
            other => other,
        })?;

        Ok(())
    }

    async fn has_delivery(
        &self,
        task_id: TaskId,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM delivery_records WHERE task_id = $1 AND completed_at = $2)",
        )
        .bind(task_id.as_uuid())
        .bind(completed_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_delivery", e))
    }

    async fn deliveries(&self, task_id: TaskId) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, identity, short_result, full_result, completed_at, delivered_at
            FROM delivery_records
            WHERE task_id = $1
            ORDER BY delivered_at ASC, id ASC
            "#,
        )
        .bind(task_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deliveries", e))?;

        rows.iter().map(decode_delivery).collect()
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Decode(format!("column {name}: {e}")))
}

fn decode_task(row: &PgRow) -> Result<Task, StoreError> {
    let status: String = column(row, "status")?;
    let record = TaskRecord {
        id: TaskId::from_uuid(column::<Uuid>(row, "id")?),
        identity: column(row, "identity")?,
        query_text: column(row, "query_text")?,
        status: status
            .parse()
            .map_err(|e| StoreError::Decode(format!("column status: {e}")))?,
        short_result: column(row, "short_result")?,
        full_result: column(row, "full_result")?,
        error: column(row, "error")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    };

    Task::restore(record).map_err(|e| StoreError::Decode(e.to_string()))
}

fn decode_delivery(row: &PgRow) -> Result<DeliveryRecord, StoreError> {
    Ok(DeliveryRecord {
        task_id: TaskId::from_uuid(column::<Uuid>(row, "task_id")?),
        identity: column(row, "identity")?,
        short_result: column(row, "short_result")?,
        full_result: column(row, "full_result")?,
        completed_at: column(row, "completed_at")?,
        delivered_at: column(row, "delivered_at")?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                // Only delivery_records has a foreign key; the caller fills in the id.
                Some("23503") => StoreError::NotFound(TaskId::from_uuid(Uuid::nil())),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Decode(format!("column {index} in {operation}: {source}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Database(format!("timed out acquiring a connection in {operation}"))
        }
        other => StoreError::Database(format!("sqlx error in {operation}: {other}")),
    }
}
