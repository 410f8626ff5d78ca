use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use scout_core::DeliveryRecord;
use scout_queue::{CompletedTaskMessage, Delivery, QueueMessage};

use crate::notify::{Notification, NotificationPublisher};
use crate::store::TaskStore;

use super::{Disposition, MessageHandler};

/// Consumes completed messages and notifies the requester.
///
/// Every message is acknowledged, delivered or not. A delivery that exhausts
/// its attempts is logged and reported as `Disposition::Failed`; no record is
/// written for it.
#[derive(Clone)]
pub struct DeliveryStage {
    store: Arc<dyn TaskStore>,
    publisher: Arc<NotificationPublisher>,
}

impl DeliveryStage {
    pub fn new(store: Arc<dyn TaskStore>, publisher: Arc<NotificationPublisher>) -> Self {
        Self { store, publisher }
    }

    async fn already_delivered(&self, message: &CompletedTaskMessage) -> bool {
        match self
            .store
            .has_delivery(message.task_id, message.completed_at)
            .await
        {
            Ok(found) => found,
            Err(err) => {
                // Prefer a possible duplicate over a lost notification.
                warn!(task_id = %message.task_id, error = %err, "delivery lookup failed; sending anyway");
                false
            }
        }
    }
}

#[async_trait]
impl MessageHandler for DeliveryStage {
    fn name(&self) -> &'static str {
        "delivery"
    }

    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message = match CompletedTaskMessage::decode(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(key = %delivery.key, error = %err, "malformed completed message");
                return Disposition::Reject(err.to_string());
            }
        };

        if self.already_delivered(&message).await {
            debug!(task_id = %message.task_id, "completion already delivered; skipping");
            return Disposition::Handled;
        }

        let notification = Notification {
            task_id: message.task_id,
            identity: message.identity.clone(),
            short_result: message.short_result.clone(),
            full_result: message.full_result.clone(),
        };

        let delivered_at = match self.publisher.publish(&notification).await {
            Ok(at) => at,
            Err(err) => {
                error!(
                    task_id = %message.task_id,
                    identity = %message.identity,
                    status = ?message.status,
                    error = %err,
                    "notification delivery failed"
                );
                return Disposition::Failed(err.to_string());
            }
        };

        let record = DeliveryRecord {
            task_id: message.task_id,
            identity: message.identity,
            short_result: message.short_result,
            full_result: message.full_result,
            completed_at: message.completed_at,
            delivered_at,
        };
        if let Err(err) = self.store.record_delivery(&record).await {
            error!(task_id = %record.task_id, error = %err, "delivered but failed to record delivery");
            return Disposition::Failed(err.to_string());
        }

        Disposition::Handled
    }
}
