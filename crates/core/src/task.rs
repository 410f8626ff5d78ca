//! Task lifecycle state machine.
//!
//! ```text
//! Queued ──▶ Processing ──▶ Done
//!   ▲                  └──▶ Failed
//!   └──────── retry ◀──────┘ (Done | Failed only)
//! ```
//!
//! Delivery is at-least-once, so the worker-side transitions tolerate a task
//! that has already moved past `Queued` (a redelivered message). The retry
//! transition is the only strictly guarded one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TaskId;

/// Lifecycle status of a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Done,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    /// `Done` and `Failed` are terminal until an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::validation(format!("unknown task status: {other}"))),
        }
    }
}

/// A submitted query and its current outcome.
///
/// Fields are private so that every mutation goes through a lifecycle method;
/// stores rebuild instances from rows via [`Task::restore`], which re-checks the
/// invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    identity: String,
    query_text: String,
    status: TaskStatus,
    short_result: Option<String>,
    full_result: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Raw persisted shape of a task, as read from a store row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub identity: String,
    pub query_text: String,
    pub status: TaskStatus,
    pub short_result: Option<String>,
    pub full_result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new `Queued` task. Both inputs must contain non-whitespace text.
    pub fn submit(
        identity: impl Into<String>,
        query_text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let identity = identity.into();
        let query_text = query_text.into();

        if identity.trim().is_empty() {
            return Err(DomainError::validation("identity must not be empty"));
        }
        if query_text.trim().is_empty() {
            return Err(DomainError::validation("text must not be empty"));
        }

        Ok(Self {
            id: TaskId::new(),
            identity,
            query_text,
            status: TaskStatus::Queued,
            short_result: None,
            full_result: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild a task from its persisted shape, rejecting records that break
    /// the result/error invariants.
    pub fn restore(record: TaskRecord) -> DomainResult<Self> {
        let task = Self {
            id: record.id,
            identity: record.identity,
            query_text: record.query_text,
            status: record.status,
            short_result: record.short_result,
            full_result: record.full_result,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        };

        if !task.invariants_hold() {
            return Err(DomainError::validation(format!(
                "task {} has fields inconsistent with status {}",
                task.id, task.status
            )));
        }
        Ok(task)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn short_result(&self) -> Option<&str> {
        self.short_result.as_deref()
    }

    pub fn full_result(&self) -> Option<&str> {
        self.full_result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// `Queued → Processing`.
    ///
    /// Returns `false` (and changes nothing) when the task is already past
    /// `Queued`: a redelivered message may proceed since the computation is pure.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Queued {
            return false;
        }
        self.status = TaskStatus::Processing;
        self.updated_at = now;
        true
    }

    /// `Processing → Done`, storing both results and clearing any error.
    ///
    /// Re-completing a terminal task overwrites it (duplicate delivery).
    pub fn complete(
        &mut self,
        short_result: impl Into<String>,
        full_result: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_started(TaskStatus::Done)?;
        self.status = TaskStatus::Done;
        self.short_result = Some(short_result.into());
        self.full_result = Some(full_result.into());
        self.error = None;
        self.updated_at = now;
        Ok(())
    }

    /// `Processing → Failed`, storing the error and clearing any results.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_started(TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.short_result = None;
        self.full_result = None;
        self.error = Some(error.into());
        self.updated_at = now;
        Ok(())
    }

    /// `Done | Failed → Queued`, clearing results and error.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.is_terminal() {
            return Err(DomainError::conflict("task still in progress"));
        }
        self.status = TaskStatus::Queued;
        self.short_result = None;
        self.full_result = None;
        self.error = None;
        self.updated_at = now;
        Ok(())
    }

    /// Results and error are mutually exclusive, and both are absent while the
    /// task is queued or processing.
    pub fn invariants_hold(&self) -> bool {
        let has_results = self.short_result.is_some() && self.full_result.is_some();
        let no_results = self.short_result.is_none() && self.full_result.is_none();

        match self.status {
            TaskStatus::Queued | TaskStatus::Processing => no_results && self.error.is_none(),
            TaskStatus::Done => has_results && self.error.is_none(),
            TaskStatus::Failed => no_results && self.error.is_some(),
        }
    }

    fn ensure_started(&self, to: TaskStatus) -> DomainResult<()> {
        if self.status == TaskStatus::Queued {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}

/// Audit row written once per successful external delivery. Never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub task_id: TaskId,
    pub identity: String,
    pub short_result: String,
    pub full_result: String,
    /// Completion cycle this delivery belongs to.
    pub completed_at: DateTime<Utc>,
    pub delivered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queued() -> Task {
        Task::submit("u1", "hello", Utc::now()).unwrap()
    }

    #[test]
    fn submit_rejects_blank_inputs() {
        assert!(matches!(
            Task::submit("  ", "hello", Utc::now()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            Task::submit("u1", "\n\t", Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn happy_path_reaches_done() {
        let mut task = queued();
        assert_eq!(task.status(), TaskStatus::Queued);
        assert!(task.short_result().is_none() && task.error().is_none());

        assert!(task.begin_processing(Utc::now()));
        assert_eq!(task.status(), TaskStatus::Processing);

        task.complete("short", "short and long", Utc::now()).unwrap();
        assert_eq!(task.status(), TaskStatus::Done);
        assert_eq!(task.short_result(), Some("short"));
        assert_eq!(task.full_result(), Some("short and long"));
        assert!(task.error().is_none());
        assert!(task.invariants_hold());
    }

    #[test]
    fn failure_clears_results() {
        let mut task = queued();
        task.begin_processing(Utc::now());
        task.complete("a", "b", Utc::now()).unwrap();

        task.fail("boom", Utc::now()).unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.error(), Some("boom"));
        assert!(task.short_result().is_none() && task.full_result().is_none());
    }

    #[test]
    fn completing_a_queued_task_is_rejected() {
        let mut task = queued();
        let err = task.complete("a", "b", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: TaskStatus::Queued,
                to: TaskStatus::Done
            }
        );
    }

    #[test]
    fn duplicate_processing_is_a_no_op() {
        let mut task = queued();
        task.begin_processing(Utc::now());
        task.complete("a", "b", Utc::now()).unwrap();
        let before = task.clone();

        assert!(!task.begin_processing(Utc::now()));
        assert_eq!(task, before);
    }

    #[test]
    fn retry_only_from_terminal_states() {
        let mut task = queued();
        assert!(matches!(
            task.reset_for_retry(Utc::now()),
            Err(DomainError::Conflict(_))
        ));

        task.begin_processing(Utc::now());
        let snapshot = task.clone();
        assert!(matches!(
            task.reset_for_retry(Utc::now()),
            Err(DomainError::Conflict(_))
        ));
        assert_eq!(task, snapshot);

        task.fail("boom", Utc::now()).unwrap();
        task.reset_for_retry(Utc::now()).unwrap();
        assert_eq!(task.status(), TaskStatus::Queued);
        assert!(task.error().is_none());
    }

    #[test]
    fn restore_rejects_inconsistent_records() {
        let task = queued();
        let record = TaskRecord {
            id: task.id(),
            identity: "u1".into(),
            query_text: "hello".into(),
            status: TaskStatus::Queued,
            short_result: Some("leftover".into()),
            full_result: None,
            error: None,
            created_at: task.created_at(),
            updated_at: task.updated_at(),
        };
        assert!(Task::restore(record).is_err());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<TaskStatus>().is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Begin,
        Complete,
        Fail,
        Retry,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Begin),
            Just(Op::Complete),
            Just(Op::Fail),
            Just(Op::Retry),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold_under_any_operation_sequence(ops in proptest::collection::vec(op(), 0..40)) {
            let mut task = queued();
            let mut last_update = task.updated_at();

            for op in ops {
                let before = task.status();
                let result = match op {
                    Op::Begin => { task.begin_processing(Utc::now()); Ok(()) }
                    Op::Complete => task.complete("s", "s f", Utc::now()),
                    Op::Fail => task.fail("e", Utc::now()),
                    Op::Retry => task.reset_for_retry(Utc::now()),
                };

                prop_assert!(task.invariants_hold());
                prop_assert!(task.updated_at() >= last_update);
                last_update = task.updated_at();

                if result.is_err() {
                    prop_assert_eq!(task.status(), before);
                }
                if matches!(op, Op::Retry) && result.is_ok() {
                    prop_assert!(before.is_terminal());
                }
            }
        }
    }
}
