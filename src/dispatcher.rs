//! Fan-out of terminal-state notifications to registered callback endpoints.
//!
//! Each endpoint gets its own delivery running on its own tokio task, with its
//! own retry counter and backoff timer. A slow or dead endpoint only delays
//! itself. Delivery is at-least-once: a retry may follow a request that the
//! endpoint did process but whose response got lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::registry::Registration;
use crate::state_machine::Task;
use crate::webhook::{DeliveryError, Notification, NotificationEvent, WebhookSender};

/// Retry behaviour for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per endpoint, including the first.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Delay after the given failed attempt:
    /// `base_delay_ms * 2^(attempt - 1)`, capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = 2u64
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay_ms.checked_mul(factor))
            .unwrap_or(u64::MAX)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// What happened to the delivery for one registrant.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub client_id: String,
    pub callback_url: String,
    pub delivery_id: String,
    pub attempts: u32,
    pub delivered: bool,
    pub status: Option<u16>,
    pub last_error: Option<String>,
}

/// Result of one dispatch sweep over a task's registrations.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub task_id: String,
    pub event: NotificationEvent,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.delivered).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn outcome(&self, client_id: &str) -> Option<&DeliveryOutcome> {
        self.outcomes.iter().find(|o| o.client_id == client_id)
    }
}

/// Process-wide delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub sweeps: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
}

pub struct NotificationDispatcher {
    sender: Arc<dyn WebhookSender>,
    retry: RetryConfig,
    sweeps: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn WebhookSender>, retry: RetryConfig) -> Self {
        Self {
            sender,
            retry,
            sweeps: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Notify every target about `task`'s terminal state and wait for all
    /// deliveries to finish (delivered or given up).
    pub async fn dispatch(&self, task: &Task, targets: Vec<Registration>) -> DispatchReport {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let notification = Notification::from_task(task);
        let mut report = DispatchReport {
            task_id: task.id.clone(),
            event: notification.event,
            outcomes: Vec::with_capacity(targets.len()),
        };

        if targets.is_empty() {
            info!(task_id = %task.id, "no callbacks registered, nothing to deliver");
            return report;
        }
        info!(task_id = %task.id, callbacks = targets.len(), event = ?notification.event, "sending callbacks");

        let mut deliveries = JoinSet::new();
        for target in targets {
            let addressed = notification.addressed_to(&target.client_id);
            deliveries.spawn(deliver_with_retry(
                Arc::clone(&self.sender),
                self.retry.clone(),
                target,
                addressed,
            ));
        }

        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(outcome) => {
                    let counter = if outcome.delivered {
                        &self.succeeded
                    } else {
                        &self.failed
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    report.outcomes.push(outcome);
                }
                Err(err) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    error!(task_id = %task.id, error = %err, "delivery task aborted");
                }
            }
        }

        info!(
            task_id = %task.id,
            delivered = report.delivered(),
            failed = report.failed(),
            "all callbacks processed"
        );
        report
    }

    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            deliveries_succeeded: self.succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

async fn deliver_with_retry(
    sender: Arc<dyn WebhookSender>,
    retry: RetryConfig,
    target: Registration,
    notification: Notification,
) -> DeliveryOutcome {
    let delivery_id = Uuid::new_v4().to_string();
    let max_attempts = retry.max_attempts.max(1);
    let mut last_error = None;
    let mut status = None;

    for attempt in 1..=max_attempts {
        debug!(
            client_id = %target.client_id,
            url = %target.callback_url,
            attempt,
            "sending callback"
        );
        match sender
            .deliver(&target.callback_url, &delivery_id, &notification)
            .await
        {
            Ok(code) => {
                info!(
                    task_id = %notification.task_id,
                    client_id = %target.client_id,
                    attempt,
                    "callback delivered"
                );
                return DeliveryOutcome {
                    client_id: target.client_id,
                    callback_url: target.callback_url,
                    delivery_id,
                    attempts: attempt,
                    delivered: true,
                    status: Some(code),
                    last_error,
                };
            }
            Err(err) => {
                // Status of the last attempt only; a network failure has none.
                status = match &err {
                    DeliveryError::Rejected { status: code, .. } => Some(*code),
                    DeliveryError::Network(_) => None,
                };
                if attempt < max_attempts {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        client_id = %target.client_id,
                        url = %target.callback_url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "callback attempt failed, retrying"
                    );
                    last_error = Some(err.to_string());
                    sleep(delay).await;
                } else {
                    last_error = Some(err.to_string());
                }
            }
        }
    }

    error!(
        task_id = %notification.task_id,
        client_id = %target.client_id,
        url = %target.callback_url,
        attempts = max_attempts,
        error = last_error.as_deref().unwrap_or_default(),
        "callback permanently failed"
    );
    DeliveryOutcome {
        client_id: target.client_id,
        callback_url: target.callback_url,
        delivery_id,
        attempts: max_attempts,
        delivered: false,
        status,
        last_error,
    }
}
