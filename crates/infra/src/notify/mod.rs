//! Outbound notifications for completed tasks.
//!
//! A [`NotificationChannel`] performs one delivery attempt; the
//! [`NotificationPublisher`] owns the attempt budget and the delay between
//! attempts.

mod publisher;
mod telegram;

pub use publisher::NotificationPublisher;
pub use telegram::TelegramChannel;

use async_trait::async_trait;

use scout_core::TaskId;

/// What gets sent for one completed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub task_id: TaskId,
    pub identity: String,
    pub short_result: String,
    pub full_result: String,
}

impl Notification {
    /// Message body: short result, blank line, full result.
    pub fn text(&self) -> String {
        format!("{}\n\n{}", self.short_result, self.full_result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Transport-level failure (connect, timeout, unreadable response).
    #[error("http error: {0}")]
    Http(String),

    /// The provider answered but did not accept the message.
    #[error("rejected by provider: {0}")]
    Rejected(String),

    #[error("delivery failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// A single-attempt delivery endpoint.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}
