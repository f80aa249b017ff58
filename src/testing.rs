//! Shared fakes for unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::dispatcher::{NotificationDispatcher, RetryConfig};
use crate::executor::{ExecutorSettings, TaskExecutor};
use crate::registry::CallbackRegistry;
use crate::store::TaskStore;
use crate::webhook::{DeliveryError, Notification, WebhookSender};
use crate::work::{UnitOfWork, WorkError, WorkInput};

/// Records every notification; URLs in `failing` always get a 500.
#[derive(Default)]
pub struct RecordingSender {
    delivered: Mutex<Vec<(String, Notification)>>,
    failing: HashSet<String>,
}

impl RecordingSender {
    pub fn failing(urls: &[&str]) -> Self {
        Self {
            delivered: Mutex::default(),
            failing: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    pub fn deliveries_to(&self, url: &str) -> Vec<Notification> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookSender for RecordingSender {
    async fn deliver(
        &self,
        url: &str,
        _delivery_id: &str,
        notification: &Notification,
    ) -> Result<u16, DeliveryError> {
        if self.failing.contains(url) {
            return Err(DeliveryError::Rejected {
                status: 500,
                body: "always failing".into(),
            });
        }
        self.delivered
            .lock()
            .unwrap()
            .push((url.to_string(), notification.clone()));
        Ok(200)
    }
}

/// Sleeps, then returns a fixed outcome.
pub struct FixedWork {
    pub delay: Duration,
    pub outcome: Result<Value, WorkError>,
}

impl FixedWork {
    pub fn ok(value: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            outcome: Ok(value),
        })
    }

    pub fn err(message: &str) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            outcome: Err(WorkError::Failed(message.to_string())),
        })
    }
}

#[async_trait]
impl UnitOfWork for FixedWork {
    async fn run(&self, _input: WorkInput) -> Result<Value, WorkError> {
        tokio::time::sleep(self.delay).await;
        self.outcome.clone()
    }
}

/// Echoes the cycle it was called for, so tests can see folded comments.
pub struct EchoWork;

#[async_trait]
impl UnitOfWork for EchoWork {
    async fn run(&self, input: WorkInput) -> Result<Value, WorkError> {
        Ok(json!({
            "iteration": input.iteration,
            "comments": input.comments,
        }))
    }
}

pub struct PanickingWork;

#[async_trait]
impl UnitOfWork for PanickingWork {
    async fn run(&self, _input: WorkInput) -> Result<Value, WorkError> {
        panic!("extractor crashed")
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_delay_ms: 5,
        max_delay_ms: 10,
    }
}

pub fn executor(sender: Arc<RecordingSender>, settings: ExecutorSettings) -> TaskExecutor {
    TaskExecutor::new(
        Arc::new(TaskStore::new()),
        Arc::new(CallbackRegistry::new()),
        Arc::new(NotificationDispatcher::new(sender, fast_retry())),
        settings,
    )
}
