//! Iteration policy for human-validated extraction.
//!
//! A validated task keeps running while drafts go back and forth with a
//! reviewer. Only `accept` or running out of iterations ends it, and only then
//! are subscribers notified.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, TaskhookError};
use crate::executor::{CycleOutcome, StartReport, TaskExecutor};
use crate::state_machine::{ExecutionMode, FailureKind, Signal, Task, Transition};
use crate::store::AppliedSignal;
use crate::work::{UnitOfWork, WorkInput};

/// Returned by [`IterationPolicy::submit`].
#[derive(Debug)]
pub struct SignalReport {
    pub transition: Transition,
    pub task: Task,
    /// Re-extraction cycle or terminal notification now running in the background.
    pub cycle: JoinHandle<CycleOutcome>,
}

pub struct IterationPolicy {
    executor: TaskExecutor,
    max_iterations: u32,
}

impl IterationPolicy {
    /// `max_iterations` must be positive.
    pub fn new(executor: TaskExecutor, max_iterations: u32) -> Result<Self> {
        if max_iterations == 0 {
            return Err(TaskhookError::Config(
                "max_iterations must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            executor,
            max_iterations,
        })
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Start the first drafting cycle of a validated task. `work` is reused
    /// for every re-extraction of this run.
    pub fn start(
        &self,
        task_id: &str,
        started_by: Option<&str>,
        work: Arc<dyn UnitOfWork>,
    ) -> Result<StartReport> {
        self.executor
            .start(task_id, started_by, ExecutionMode::Validated, work)
    }

    /// Apply a reviewer's decision on the current draft.
    pub fn submit(&self, task_id: &str, signal: Signal) -> Result<SignalReport> {
        let AppliedSignal {
            transition,
            task,
            work,
        } = self
            .executor
            .store()
            .apply_signal(task_id, signal, self.max_iterations)
            .map_err(|err| self.explain(task_id, err))?;

        let cycle = match &transition {
            Transition::Accepted => {
                info!(task_id, iteration = task.iteration_count, "draft accepted");
                self.executor.spawn_notify(task.clone())
            }
            Transition::Reextract { iteration } => {
                info!(task_id, iteration, "re-extraction requested");
                let input = WorkInput {
                    task_id: task_id.to_string(),
                    iteration: *iteration,
                    comments: task
                        .validation
                        .as_ref()
                        .map(|cycle| cycle.comments.clone())
                        .unwrap_or_default(),
                };
                match work {
                    Some(work) => self.executor.spawn_cycle(input, work),
                    None => self.orphaned(task_id),
                }
            }
            Transition::Escalated { iterations } => {
                warn!(task_id, iterations, "max iterations reached, escalating");
                self.executor.spawn_notify(task.clone())
            }
        };

        Ok(SignalReport {
            transition,
            task,
            cycle,
        })
    }

    /// Signals on an escalated task report the escalation, not a bare transition error.
    fn explain(&self, task_id: &str, err: TaskhookError) -> TaskhookError {
        if let TaskhookError::InvalidTransition { .. } = err
            && let Ok(task) = self.executor.store().get(task_id)
            && task.failure.as_ref().is_some_and(FailureKind::is_escalation)
        {
            return TaskhookError::MaxIterationsExceeded {
                task_id: task_id.to_string(),
                max_iterations: self.max_iterations,
            };
        }
        err
    }

    // A re-extraction with nothing to run: fail the task instead of leaving it drafting forever.
    fn orphaned(&self, task_id: &str) -> JoinHandle<CycleOutcome> {
        let executor = self.executor.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let failure = FailureKind::Work {
                message: "no unit of work registered for re-extraction".to_string(),
            };
            match executor.fail(&task_id, failure).await {
                Ok(Some(report)) => CycleOutcome::Notified(report),
                Ok(None) => CycleOutcome::Duplicate,
                Err(err) => CycleOutcome::Rejected(err.to_string()),
            }
        })
    }
}
