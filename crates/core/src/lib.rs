//! `scout-core`: task domain building blocks.
//!
//! This crate contains the **pure** task model: identifiers, the lifecycle
//! state machine, pagination arithmetic and the domain error type. It performs
//! no IO; stores and stages in `scout-infra` drive every transition through it.

pub mod error;
pub mod id;
pub mod page;
pub mod task;

pub use error::{DomainError, DomainResult};
pub use id::TaskId;
pub use page::{PageMeta, PageRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use task::{DeliveryRecord, Task, TaskRecord, TaskStatus};
