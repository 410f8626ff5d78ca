use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::TelegramSettings;
use crate::retry::RetryPolicy;

use super::{DeliveryError, Notification, NotificationChannel, TelegramChannel};

/// Delivers notifications through an optional channel with a fixed attempt
/// budget.
///
/// Without a channel every notification is only logged and reported as
/// delivered, so local setups keep an audit trail without credentials.
#[derive(Clone)]
pub struct NotificationPublisher {
    channel: Option<Arc<dyn NotificationChannel>>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for NotificationPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationPublisher")
            .field("channel", &self.channel.as_ref().map(|c| c.name()))
            .field("policy", &self.policy)
            .finish()
    }
}

impl NotificationPublisher {
    pub fn new(channel: Option<Arc<dyn NotificationChannel>>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    /// Log-only publisher.
    pub fn unconfigured() -> Self {
        Self::new(None, RetryPolicy::fixed(1, std::time::Duration::ZERO))
    }

    /// Telegram when both a bot token and a chat id are configured, log-only
    /// otherwise.
    pub fn from_settings(settings: &TelegramSettings) -> Result<Self, DeliveryError> {
        let policy = RetryPolicy::fixed(settings.max_attempts, settings.retry_delay);
        let channel: Option<Arc<dyn NotificationChannel>> =
            match (&settings.bot_token, &settings.chat_id) {
                (Some(token), Some(chat_id)) => Some(Arc::new(TelegramChannel::new(
                    settings.api_base.clone(),
                    token.clone(),
                    chat_id.clone(),
                    settings.timeout,
                )?)),
                _ => None,
            };
        Ok(Self::new(channel, policy))
    }

    pub fn is_configured(&self) -> bool {
        self.channel.is_some()
    }

    /// Deliver `notification`, returning the delivery time.
    ///
    /// Attempts stop at the first success; after the last failed attempt the
    /// result is `DeliveryError::Exhausted`.
    pub async fn publish(&self, notification: &Notification) -> Result<DateTime<Utc>, DeliveryError> {
        let Some(channel) = &self.channel else {
            warn!(
                task_id = %notification.task_id,
                identity = %notification.identity,
                short_result = %notification.short_result,
                full_result = %notification.full_result,
                "notification channel not configured; logging result instead"
            );
            return Ok(Utc::now());
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match channel.send(notification).await {
                Ok(()) => {
                    info!(
                        task_id = %notification.task_id,
                        channel = channel.name(),
                        attempt,
                        "notification delivered"
                    );
                    return Ok(Utc::now());
                }
                Err(err) => {
                    warn!(
                        task_id = %notification.task_id,
                        channel = channel.name(),
                        attempt,
                        error = %err,
                        "notification attempt failed"
                    );
                    if !self.policy.should_retry(attempt) {
                        return Err(DeliveryError::Exhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                    tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use scout_core::TaskId;

    use super::*;

    /// Fails the first `failures` sends, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NotificationChannel for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, _: &Notification) -> Result<(), DeliveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(DeliveryError::Http("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    fn notification() -> Notification {
        Notification {
            task_id: TaskId::new(),
            identity: "u1".into(),
            short_result: "s".into(),
            full_result: "f".into(),
        }
    }

    fn publisher(failures: u32) -> (NotificationPublisher, Arc<Flaky>) {
        let channel = Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
        });
        let publisher = NotificationPublisher::new(
            Some(channel.clone()),
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        );
        (publisher, channel)
    }

    #[tokio::test]
    async fn recovers_within_the_attempt_budget() {
        let (publisher, channel) = publisher(2);
        assert!(publisher.publish(&notification()).await.is_ok());
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (publisher, channel) = publisher(10);
        let err = publisher.publish(&notification()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Exhausted { attempts: 3, .. }));
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unconfigured_publisher_logs_and_succeeds() {
        let publisher = NotificationPublisher::unconfigured();
        assert!(!publisher.is_configured());
        assert!(publisher.publish(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn telegram_needs_both_token_and_chat_id() {
        let mut settings = TelegramSettings::default();
        assert!(!NotificationPublisher::from_settings(&settings).unwrap().is_configured());

        settings.chat_id = Some("-100".into());
        assert!(!NotificationPublisher::from_settings(&settings).unwrap().is_configured());

        settings.chat_id = None;
        settings.bot_token = Some("tok".into());
        assert!(!NotificationPublisher::from_settings(&settings).unwrap().is_configured());

        settings.chat_id = Some("-100".into());
        assert!(NotificationPublisher::from_settings(&settings).unwrap().is_configured());
    }

    #[tokio::test]
    async fn token_without_chat_id_logs_instead_of_sending() {
        let settings = TelegramSettings {
            bot_token: Some("tok".into()),
            chat_id: None,
            api_base: "http://127.0.0.1:9".into(),
            retry_delay: Duration::from_millis(1),
            ..TelegramSettings::default()
        };
        let publisher = NotificationPublisher::from_settings(&settings).unwrap();

        assert!(publisher.publish(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn retries_against_a_failing_http_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bottok/sendMessage")
            .with_status(502)
            .with_body("bad gateway")
            .expect(3)
            .create_async()
            .await;

        let settings = TelegramSettings {
            bot_token: Some("tok".into()),
            chat_id: Some("-100".into()),
            api_base: server.url(),
            retry_delay: Duration::from_millis(1),
            ..TelegramSettings::default()
        };
        let publisher = NotificationPublisher::from_settings(&settings).unwrap();

        let err = publisher.publish(&notification()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Exhausted { attempts: 3, .. }));
        mock.assert_async().await;
    }
}
