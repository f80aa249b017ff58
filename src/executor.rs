use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::dispatcher::{DispatchReport, NotificationDispatcher};
use crate::error::Result;
use crate::registry::CallbackRegistry;
use crate::state_machine::{ExecutionMode, FailureKind, Task, Terminal};
use crate::store::TaskStore;
use crate::work::{UnitOfWork, WorkInput};

#[derive(Debug, Clone, Default)]
pub struct ExecutorSettings {
    /// Work running longer than this fails the task.
    pub work_timeout: Option<Duration>,
    /// Drop a task's registrations once its terminal notification was sent.
    pub clear_after_dispatch: bool,
}

/// How one background cycle of a task ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The task reached a terminal state and subscribers were notified.
    Notified(DispatchReport),
    /// A draft is waiting for a reviewer.
    AwaitingValidation { iteration: u32 },
    /// The terminal state was already recorded; nobody was notified again.
    Duplicate,
    /// The store refused the transition.
    Rejected(String),
}

/// Returned by [`TaskExecutor::start`] before any work has run.
#[derive(Debug)]
pub struct StartReport {
    pub task: Task,
    /// Registrations known at start time. Informational only: more may
    /// arrive before completion.
    pub registered_callbacks: usize,
    pub cycle: JoinHandle<CycleOutcome>,
}

/// Runs units of work in the background and drives tasks to a terminal state.
#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<TaskStore>,
    registry: Arc<CallbackRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    settings: ExecutorSettings,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<CallbackRegistry>,
        dispatcher: Arc<NotificationDispatcher>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Move the task to running and launch its work without waiting for it.
    ///
    /// Fails with `Conflict` if the task is already running. A failed task
    /// restarts in `mode`, whatever mode its previous run used.
    pub fn start(
        &self,
        task_id: &str,
        started_by: Option<&str>,
        mode: ExecutionMode,
        work: Arc<dyn UnitOfWork>,
    ) -> Result<StartReport> {
        let task = self
            .store
            .begin(task_id, started_by, mode, Arc::clone(&work))?;
        let registered_callbacks = self.registry.count(task_id);
        info!(
            task_id,
            started_by = started_by.unwrap_or("-"),
            mode = ?task.mode(),
            registered_callbacks,
            "task started"
        );

        let input = WorkInput {
            task_id: task.id.clone(),
            iteration: task.iteration_count,
            comments: task
                .validation
                .as_ref()
                .map(|cycle| cycle.comments.clone())
                .unwrap_or_default(),
        };
        let cycle = self.spawn_cycle(input, work);
        Ok(StartReport {
            task,
            registered_callbacks,
            cycle,
        })
    }

    /// Run one work cycle for an already running task in the background.
    pub fn spawn_cycle(&self, input: WorkInput, work: Arc<dyn UnitOfWork>) -> JoinHandle<CycleOutcome> {
        let executor = self.clone();
        tokio::spawn(async move { executor.run_cycle(input, work).await })
    }

    /// Notify subscribers about an already applied terminal transition, in the background.
    pub fn spawn_notify(&self, task: Task) -> JoinHandle<CycleOutcome> {
        let executor = self.clone();
        tokio::spawn(async move { CycleOutcome::Notified(executor.notify(&task).await) })
    }

    /// External completion signal. A repeat of an identical completion is a
    /// no-op and returns `None`.
    pub async fn complete(&self, task_id: &str, result: Value) -> Result<Option<DispatchReport>> {
        match self.store.mark_completed(task_id, result)? {
            Terminal::Applied(task) => Ok(Some(self.notify(&task).await)),
            Terminal::Unchanged => Ok(None),
        }
    }

    /// External failure signal, same discipline as [`complete`](Self::complete).
    pub async fn fail(&self, task_id: &str, failure: FailureKind) -> Result<Option<DispatchReport>> {
        match self.store.mark_failed(task_id, failure)? {
            Terminal::Applied(task) => Ok(Some(self.notify(&task).await)),
            Terminal::Unchanged => Ok(None),
        }
    }

    /// Deliver the terminal notification of `task`.
    ///
    /// Called only after the store transition returned, so every registration
    /// that completed before it is part of the snapshot.
    pub async fn notify(&self, task: &Task) -> DispatchReport {
        let targets = if self.settings.clear_after_dispatch {
            self.registry.drain(&task.id)
        } else {
            self.registry.list(&task.id)
        };
        self.dispatcher.dispatch(task, targets).await
    }

    async fn run_cycle(&self, input: WorkInput, work: Arc<dyn UnitOfWork>) -> CycleOutcome {
        let task_id = input.task_id.clone();
        let iteration = input.iteration;
        info!(task_id = %task_id, iteration, "processing task");

        let outcome = self.run_work(input, work).await;
        let mode = match self.store.get(&task_id) {
            Ok(task) => task.mode(),
            Err(err) => return CycleOutcome::Rejected(err.to_string()),
        };

        let terminal = match (mode, outcome) {
            (_, Err(failure)) => {
                warn!(task_id = %task_id, error = %failure, "task failed");
                self.store.mark_failed(&task_id, failure)
            }
            (ExecutionMode::Direct, Ok(result)) => {
                info!(task_id = %task_id, "task completed, sending callbacks");
                self.store.mark_completed(&task_id, result)
            }
            (ExecutionMode::Validated, Ok(draft)) => {
                return match self.store.record_draft(&task_id, draft) {
                    Ok(task) => {
                        info!(task_id = %task_id, iteration = task.iteration_count, "draft ready for validation");
                        CycleOutcome::AwaitingValidation {
                            iteration: task.iteration_count,
                        }
                    }
                    Err(err) => {
                        warn!(task_id = %task_id, error = %err, "draft discarded");
                        CycleOutcome::Rejected(err.to_string())
                    }
                };
            }
        };

        match terminal {
            Ok(Terminal::Applied(task)) => CycleOutcome::Notified(self.notify(&task).await),
            Ok(Terminal::Unchanged) => CycleOutcome::Duplicate,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "terminal transition refused");
                CycleOutcome::Rejected(err.to_string())
            }
        }
    }

    async fn run_work(
        &self,
        input: WorkInput,
        work: Arc<dyn UnitOfWork>,
    ) -> std::result::Result<Value, FailureKind> {
        let mut handle = tokio::spawn(async move { work.run(input).await });

        let joined = match self.settings.work_timeout {
            Some(limit) => match timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(FailureKind::Timeout {
                        after_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(FailureKind::Work {
                message: err.to_string(),
            }),
            Err(err) => Err(FailureKind::Panicked {
                message: err.to_string(),
            }),
        }
    }
}
