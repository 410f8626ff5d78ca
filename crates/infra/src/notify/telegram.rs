use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{DeliveryError, Notification, NotificationChannel};

/// Telegram Bot API `sendMessage` channel.
///
/// Success means the response JSON carries `"ok": true`, or the body is not
/// JSON at all and the status is 2xx.
#[derive(Debug, Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Http(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.into(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let text = notification.text();
        let form = [
            ("chat_id", self.chat_id.as_str()),
            ("text", text.as_str()),
            ("parse_mode", "HTML"),
        ];

        let response = self
            .client
            .post(self.endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DeliveryError::Http(e.without_url().to_string()))?;

        match serde_json::from_slice::<ApiResponse>(&body) {
            Ok(api) if api.ok => Ok(()),
            Ok(api) => Err(DeliveryError::Rejected(
                api.description
                    .unwrap_or_else(|| format!("response without ok flag (HTTP {status})")),
            )),
            Err(_) if status.is_success() => Ok(()),
            Err(_) => Err(DeliveryError::Rejected(format!("HTTP {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use scout_core::TaskId;

    use super::*;

    fn notification() -> Notification {
        Notification {
            task_id: TaskId::new(),
            identity: "u1".into(),
            short_result: "short".into(),
            full_result: "short and full".into(),
        }
    }

    fn channel(base: &str) -> TelegramChannel {
        TelegramChannel::new(base, "tok", "-100", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn posts_form_to_send_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bottok/sendMessage")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("chat_id".into(), "-100".into()),
                Matcher::UrlEncoded("text".into(), "short\n\nshort and full".into()),
                Matcher::UrlEncoded("parse_mode".into(), "HTML".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{}}"#)
            .create_async()
            .await;

        channel(&server.url()).send(&notification()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn ok_false_is_a_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bottok/sendMessage")
            .with_status(400)
            .with_body(r#"{"ok":false,"description":"Bad Request: chat not found"}"#)
            .create_async()
            .await;

        let err = channel(&server.url()).send(&notification()).await.unwrap_err();
        assert_eq!(err, DeliveryError::Rejected("Bad Request: chat not found".into()));
    }

    #[tokio::test]
    async fn non_json_success_counts_as_delivered() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bottok/sendMessage")
            .with_status(200)
            .with_body("accepted")
            .create_async()
            .await;

        assert!(channel(&server.url()).send(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_http_error() {
        let err = channel("http://127.0.0.1:9")
            .send(&notification())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Http(_)));
    }
}
