//! Payload posted to callback endpoints when a task reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state_machine::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    TaskCompleted,
    TaskFailed,
}

/// Body of the outbound `POST {callback_url}`.
///
/// `result` is present for `task_completed`, `error` and `reason` for
/// `task_failed`. Receivers should deduplicate on the `X-Delivery-Id`
/// header: the same notification may arrive more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    pub iteration_count: u32,
    pub completed_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Build the notification for a task in a terminal state.
    pub fn from_task(task: &Task) -> Self {
        let event = match task.status {
            TaskStatus::Completed => NotificationEvent::TaskCompleted,
            _ => NotificationEvent::TaskFailed,
        };
        let now = Utc::now();
        Self {
            event,
            task_id: task.id.clone(),
            status: task.status,
            result: task.result.clone(),
            error: task.failure.as_ref().map(ToString::to_string),
            reason: task.failure.as_ref().map(|f| f.reason().to_string()),
            started_by: task.started_by.clone(),
            iteration_count: task.iteration_count,
            completed_at: task.completed_at.unwrap_or(now),
            timestamp: now,
            callback_client_id: None,
            callback_sent_at: None,
        }
    }

    /// Copy stamped for one recipient.
    pub fn addressed_to(&self, client_id: &str) -> Self {
        Self {
            callback_client_id: Some(client_id.to_string()),
            callback_sent_at: Some(Utc::now()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::FailureKind;
    use serde_json::json;

    #[test]
    fn completed_task_notification_shape() {
        let mut task = Task::new("t1");
        task.mark_running().unwrap();
        task.mark_completed(json!("ok")).unwrap();

        let json = serde_json::to_value(Notification::from_task(&task)).unwrap();
        assert_eq!(json["event"], "task_completed");
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["result"], "ok");
        assert!(json.get("error").is_none());
        assert!(json.get("callback_client_id").is_none());
    }

    #[test]
    fn escalation_carries_reason() {
        let mut task = Task::new("doc");
        task.mark_running().unwrap();
        task.iteration_count = 3;
        task.mark_failed(FailureKind::MaxIterReached { iterations: 3 })
            .unwrap();

        let notification = Notification::from_task(&task);
        assert_eq!(notification.event, NotificationEvent::TaskFailed);
        assert_eq!(notification.reason.as_deref(), Some("max_iter_reached"));
        assert_eq!(notification.iteration_count, 3);
        assert!(notification.result.is_none());
    }

    #[test]
    fn addressed_copy_names_recipient() {
        let mut task = Task::new("t1");
        task.mark_running().unwrap();
        task.mark_completed(json!(1)).unwrap();

        let base = Notification::from_task(&task);
        let addressed = base.addressed_to("A");
        assert_eq!(addressed.callback_client_id.as_deref(), Some("A"));
        assert!(addressed.callback_sent_at.is_some());
        assert_eq!(addressed.task_id, base.task_id);
    }
}
