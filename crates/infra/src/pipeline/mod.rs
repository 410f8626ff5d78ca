//! Pipeline stages.
//!
//! ```text
//! submit ──▶ [raw queue] ──▶ WorkerStage ──▶ [completed queue] ──▶ DeliveryStage ──▶ channel
//!   ▲                                                                        │
//!   └── RetryStage (terminal tasks only)                     delivery record ◀┘
//! ```
//!
//! Submission and retry are called synchronously by the API. The worker and
//! delivery stages are [`MessageHandler`]s driven by consumer loops
//! (`crate::workers`).

mod delivery;
mod retry;
mod submission;
mod worker;

pub use delivery::DeliveryStage;
pub use retry::RetryStage;
pub use submission::SubmissionStage;
pub use worker::{WorkerStage, FAILED_SHORT_RESULT};

use async_trait::async_trait;
use thiserror::Error;

use scout_core::DomainError;
use scout_queue::{Delivery, TransportError};

use crate::store::StoreError;

/// Error returned by the synchronous stages (submission, retry).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What a consumer loop should do with a message once its handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handled; acknowledge.
    Handled,
    /// Handling failed for good but the message must not come back; acknowledge.
    Failed(String),
    /// Drop without requeue and keep it as a dead letter.
    Reject(String),
}

/// Per-message logic of an asynchronous stage.
///
/// Implementations must be idempotent: the transport is at-least-once.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, delivery: &Delivery) -> Disposition;
}
