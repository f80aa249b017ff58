use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::error::DeliveryError;
use super::types::Notification;
use crate::error::Result;

/// Header carrying the delivery id, identical across retries of one delivery.
pub const DELIVERY_ID_HEADER: &str = "x-delivery-id";
/// Header carrying the notification event name.
pub const EVENT_HEADER: &str = "x-taskhook-event";

/// Anything that can POST a notification to a callback endpoint.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Send one attempt. Returns the HTTP status on 2xx.
    async fn deliver(
        &self,
        url: &str,
        delivery_id: &str,
        notification: &Notification,
    ) -> Result<u16, DeliveryError>;
}

pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .user_agent(concat!("taskhook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for WebhookClient {
    async fn deliver(
        &self,
        url: &str,
        delivery_id: &str,
        notification: &Notification,
    ) -> Result<u16, DeliveryError> {
        let event = match notification.event {
            super::NotificationEvent::TaskCompleted => "task_completed",
            super::NotificationEvent::TaskFailed => "task_failed",
        };
        let response = self
            .client
            .post(url)
            .header(DELIVERY_ID_HEADER, delivery_id)
            .header(EVENT_HEADER, event)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable body".to_string());
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Task;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completed(id: &str) -> Notification {
        let mut task = Task::new(id);
        task.mark_running().unwrap();
        task.mark_completed(json!("ok")).unwrap();
        Notification::from_task(&task)
    }

    #[tokio::test]
    async fn posts_json_with_delivery_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/A"))
            .and(header(DELIVERY_ID_HEADER, "d-1"))
            .and(header(EVENT_HEADER, "task_completed"))
            .and(body_partial_json(json!({"task_id": "t1", "result": "ok"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = WebhookClient::new(Duration::from_secs(5)).unwrap();
        let status = client
            .deliver(&format!("{}/webhook/A", server.uri()), "d-1", &completed("t1"))
            .await
            .unwrap();
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn non_2xx_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let client = WebhookClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .deliver(&server.uri(), "d-2", &completed("t1"))
            .await
            .unwrap_err();
        match err {
            DeliveryError::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "down");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let client = WebhookClient::new(Duration::from_millis(500)).unwrap();
        let err = client
            .deliver("http://127.0.0.1:1/hook", "d-3", &completed("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Network(_)));
    }
}
