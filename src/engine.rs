//! Process-wide owner of the task store, callback registry and delivery stack.
//!
//! One [`Engine`] is built at start-up from [`TaskhookConfig`] and shared
//! behind an `Arc` by every request handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::TaskhookConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::error::Result;
use crate::executor::{StartReport, TaskExecutor};
use crate::policy::{IterationPolicy, SignalReport};
use crate::registry::{CallbackRegistry, Registration, RegistrationResult};
use crate::state_machine::{ExecutionMode, Signal, TaskSnapshot};
use crate::store::TaskStore;
use crate::webhook::{WebhookClient, WebhookSender};
use crate::work::{SimulatedExtraction, UnitOfWork};

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub active_tasks: usize,
    pub pending_callbacks: usize,
    pub tasks_with_callbacks: usize,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct Engine {
    executor: TaskExecutor,
    policy: IterationPolicy,
    work: Arc<dyn UnitOfWork>,
}

impl Engine {
    /// Real HTTP delivery and the simulated extraction as unit of work.
    pub fn from_config(config: &TaskhookConfig) -> Result<Self> {
        let sender = Arc::new(WebhookClient::new(config.delivery.timeout())?);
        let work = Arc::new(SimulatedExtraction::new(config.executor.simulated_work()));
        Self::with_parts(config, sender, work)
    }

    pub fn with_parts(
        config: &TaskhookConfig,
        sender: Arc<dyn WebhookSender>,
        work: Arc<dyn UnitOfWork>,
    ) -> Result<Self> {
        config.validate()?;

        let executor = TaskExecutor::new(
            Arc::new(TaskStore::new()),
            Arc::new(CallbackRegistry::new()),
            Arc::new(NotificationDispatcher::new(sender, config.delivery.retry())),
            config.executor_settings(),
        );
        let policy = IterationPolicy::new(executor.clone(), config.validation.max_iterations)?;

        info!(
            max_iterations = config.validation.max_iterations,
            max_attempts = config.delivery.max_attempts,
            clear_after_dispatch = config.delivery.clear_after_dispatch,
            "engine ready"
        );
        Ok(Self {
            executor,
            policy,
            work,
        })
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn policy(&self) -> &IterationPolicy {
        &self.policy
    }

    pub fn register_callback(
        &self,
        task_id: &str,
        client_id: &str,
        callback_url: &str,
    ) -> RegistrationResult {
        let outcome = self
            .executor
            .registry()
            .register(task_id, client_id, callback_url);
        info!(
            task_id,
            client_id,
            url = callback_url,
            replaced = outcome.replaced,
            registered_callbacks = outcome.registered_callbacks,
            "callback registered"
        );
        outcome
    }

    /// Returns whether `client_id` was registered, and how many registrants remain.
    pub fn unregister_callback(&self, task_id: &str, client_id: &str) -> (bool, usize) {
        let registry = self.executor.registry();
        let removed = registry.unregister(task_id, client_id);
        if removed {
            info!(task_id, client_id, "callback unregistered");
        }
        (removed, registry.count(task_id))
    }

    /// Start a task in the background, optionally under the validation loop.
    pub fn start_task(&self, task_id: &str, client_id: &str, validate: bool) -> Result<StartReport> {
        let work = Arc::clone(&self.work);
        if validate {
            self.policy.start(task_id, Some(client_id), work)
        } else {
            self.executor
                .start(task_id, Some(client_id), ExecutionMode::Direct, work)
        }
    }

    pub fn validate(&self, task_id: &str, signal: Signal) -> Result<SignalReport> {
        self.policy.submit(task_id, signal)
    }

    pub fn task_result(&self, task_id: &str) -> Result<TaskSnapshot> {
        let task = self.executor.store().get(task_id)?;
        Ok(TaskSnapshot::from_task(&task))
    }

    pub fn callbacks(&self, task_id: &str) -> Vec<Registration> {
        self.executor.registry().list(task_id)
    }

    pub fn health(&self) -> HealthReport {
        let tasks = self.executor.store().counts();
        let registrations = self.executor.registry().totals();
        let deliveries = self.executor.dispatcher().counters();
        HealthReport {
            status: "healthy",
            completed_tasks: tasks.completed,
            failed_tasks: tasks.failed,
            active_tasks: tasks.running,
            pending_callbacks: registrations.registrations,
            tasks_with_callbacks: registrations.tasks,
            deliveries_succeeded: deliveries.deliveries_succeeded,
            deliveries_failed: deliveries.deliveries_failed,
            timestamp: Utc::now(),
        }
    }
}
