//! Client-side webhook receiver.
//!
//! Stands in for a subscriber: it accepts notifications at
//! `/webhook/{client_id}`, keeps them in memory and drops repeats, which is
//! how clients absorb at-least-once delivery. A repeat is a second request
//! with the same `X-Delivery-Id`; without that header, the same
//! `(task_id, event, completed_at)`.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use crate::webhook::DELIVERY_ID_HEADER;

#[derive(Debug, Clone, Serialize)]
pub struct ReceivedNotification {
    pub task_id: String,
    pub event: String,
    pub delivery_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Delivery(String),
    Event {
        task_id: String,
        event: String,
        completed_at: String,
    },
}

impl ReceivedNotification {
    fn dedup_key(&self) -> DedupKey {
        match &self.delivery_id {
            Some(id) => DedupKey::Delivery(id.clone()),
            None => DedupKey::Event {
                task_id: self.task_id.clone(),
                event: self.event.clone(),
                completed_at: self
                    .payload
                    .get("completed_at")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct ClientInbox {
    seen: HashSet<DedupKey>,
    received: Vec<ReceivedNotification>,
}

/// Notifications received per client id.
#[derive(Debug, Default)]
pub struct Inbox {
    clients: DashMap<String, ClientInbox>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a notification. Returns `false` for a repeat.
    pub fn accept(&self, client_id: &str, notification: ReceivedNotification) -> bool {
        let mut inbox = self.clients.entry(client_id.to_string()).or_default();
        if !inbox.seen.insert(notification.dedup_key()) {
            return false;
        }
        inbox.received.push(notification);
        true
    }

    pub fn received(&self, client_id: &str) -> Vec<ReceivedNotification> {
        self.clients
            .get(client_id)
            .map(|inbox| inbox.received.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ReceiveResponse {
    pub status: &'static str,
    pub client_id: String,
    pub task_id: String,
    pub event: String,
    pub duplicate: bool,
}

#[derive(Debug, Serialize)]
pub struct InboxResponse {
    pub client_id: String,
    pub count: usize,
    pub notifications: Vec<ReceivedNotification>,
}

/// Routes of the receiver, with their own state.
pub fn router(inbox: Arc<Inbox>) -> Router {
    Router::new()
        .route("/webhook/{client_id}", post(receive).get(list))
        .with_state(inbox)
}

async fn receive(
    State(inbox): State<Arc<Inbox>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<ReceiveResponse>> {
    let Json(payload) = payload.inspect_err(|rejection| {
        warn!(client_id = %client_id, error = %rejection.body_text(), "malformed webhook payload");
    })?;

    let field = |name: &str| payload.get(name).and_then(Value::as_str).map(str::to_string);
    let (Some(task_id), Some(event)) = (field("task_id"), field("event")) else {
        return Err(ApiError::bad_request(
            "notification must carry string fields task_id and event",
        ));
    };
    let delivery_id = headers
        .get(DELIVERY_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let status = payload
        .get("status")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("-")
        .to_string();

    let fresh = inbox.accept(
        &client_id,
        ReceivedNotification {
            task_id: task_id.clone(),
            event: event.clone(),
            delivery_id,
            received_at: Utc::now(),
            payload: payload.clone(),
        },
    );
    if fresh {
        info!(
            client_id = %client_id,
            task_id = %task_id,
            event = %event,
            status = %status,
            "webhook received"
        );
    } else {
        info!(client_id = %client_id, task_id = %task_id, event = %event, "duplicate webhook ignored");
    }

    Ok(Json(ReceiveResponse {
        status: "received",
        client_id,
        task_id,
        event,
        duplicate: !fresh,
    }))
}

async fn list(State(inbox): State<Arc<Inbox>>, Path(client_id): Path<String>) -> Json<InboxResponse> {
    let notifications = inbox.received(&client_id);
    Json(InboxResponse {
        client_id,
        count: notifications.len(),
        notifications,
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        post_delivery(uri, body, "d-1")
    }

    fn post_delivery(uri: &str, body: &str, delivery_id: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .header(DELIVERY_ID_HEADER, delivery_id)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn duplicate_notification_is_ignored() {
        let inbox = Arc::new(Inbox::new());
        let app = router(inbox.clone());
        let body = json!({"event": "task_completed", "task_id": "t1", "status": "completed", "result": "ok"})
            .to_string();

        let first = app.clone().oneshot(post_json("/webhook/A", &body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_json(first).await["duplicate"], false);

        let second = app.clone().oneshot(post_json("/webhook/A", &body)).await.unwrap();
        assert_eq!(body_json(second).await["duplicate"], true);

        let listed = app
            .oneshot(Request::get("/webhook/A").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(listed).await;
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["notifications"][0]["delivery_id"], "d-1");
        assert_eq!(listed["notifications"][0]["payload"]["result"], "ok");
    }

    #[tokio::test]
    async fn separate_deliveries_of_the_same_event_are_kept() {
        let inbox = Arc::new(Inbox::new());
        let app = router(inbox.clone());
        let body = json!({"event": "task_failed", "task_id": "t1", "status": "failed"}).to_string();

        let first = app.clone().oneshot(post_delivery("/webhook/A", &body, "run-1")).await.unwrap();
        assert_eq!(body_json(first).await["duplicate"], false);
        let retry = app.clone().oneshot(post_delivery("/webhook/A", &body, "run-1")).await.unwrap();
        assert_eq!(body_json(retry).await["duplicate"], true);
        let restarted = app.oneshot(post_delivery("/webhook/A", &body, "run-2")).await.unwrap();
        assert_eq!(body_json(restarted).await["duplicate"], false);

        assert_eq!(inbox.received("A").len(), 2);
    }

    #[test]
    fn without_delivery_id_completion_time_tells_runs_apart() {
        let inbox = Inbox::new();
        let make = |completed_at: &str| ReceivedNotification {
            task_id: "t1".into(),
            event: "task_failed".into(),
            delivery_id: None,
            received_at: Utc::now(),
            payload: json!({"completed_at": completed_at}),
        };
        assert!(inbox.accept("A", make("2026-01-01T00:00:00Z")));
        assert!(!inbox.accept("A", make("2026-01-01T00:00:00Z")));
        assert!(inbox.accept("A", make("2026-01-01T00:05:00Z")));
        assert_eq!(inbox.received("A").len(), 2);
    }

    #[test]
    fn same_task_different_event_is_kept() {
        let inbox = Inbox::new();
        let make = |event: &str| ReceivedNotification {
            task_id: "t1".into(),
            event: event.into(),
            delivery_id: None,
            received_at: Utc::now(),
            payload: Value::Null,
        };
        assert!(inbox.accept("A", make("task_failed")));
        assert!(inbox.accept("A", make("task_completed")));
        assert!(inbox.accept("B", make("task_completed")));
        assert_eq!(inbox.received("A").len(), 2);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let app = router(Arc::new(Inbox::new()));
        let response = app.oneshot(post_json("/webhook/A", "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "error");
    }

    #[tokio::test]
    async fn notification_without_task_id_is_rejected() {
        let app = router(Arc::new(Inbox::new()));
        let response = app
            .oneshot(post_json("/webhook/A", r#"{"event": "task_completed"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
