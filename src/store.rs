//! In-memory task store.
//!
//! [`TaskStore`] is the single source of truth for task status. Every mutation
//! of one task runs under that task's map entry lock, so callers never observe
//! a half-applied transition; different tasks live in independent shards.
//!
//! The unit of work of a running task is kept next to it and changes hands
//! under the same lock: set by [`TaskStore::begin`], dropped by every terminal
//! transition.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, TaskhookError};
use crate::state_machine::{
    ExecutionMode, FailureKind, Signal, Task, TaskStatus, Terminal, Transition, ValidationCycle,
    ValidationMachine,
};
use crate::work::UnitOfWork;

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Result of [`TaskStore::apply_signal`].
pub struct AppliedSignal {
    pub transition: Transition,
    pub task: Task,
    /// Work to run for the next draft; set only for a re-extraction.
    pub work: Option<Arc<dyn UnitOfWork>>,
}

// Lock order: a `tasks` entry first, then `works`. Never the other way round.
#[derive(Default)]
pub struct TaskStore {
    tasks: DashMap<String, Task>,
    works: DashMap<String, Arc<dyn UnitOfWork>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending task. Task ids are single-shot.
    pub fn create(&self, task_id: &str) -> Result<Task> {
        match self.tasks.entry(task_id.to_string()) {
            Entry::Occupied(_) => Err(TaskhookError::AlreadyExists(task_id.to_string())),
            Entry::Vacant(slot) => {
                let task = Task::new(task_id);
                slot.insert(task.clone());
                Ok(task)
            }
        }
    }

    /// Create the task if needed, move it to running in `mode` and attach its
    /// work, all in one step.
    ///
    /// Two concurrent calls for the same id yield exactly one running
    /// transition; the loser sees [`TaskhookError::Conflict`] and leaves the
    /// winner's work in place. A restarted task takes the mode of the new run.
    pub fn begin(
        &self,
        task_id: &str,
        started_by: Option<&str>,
        mode: ExecutionMode,
        work: Arc<dyn UnitOfWork>,
    ) -> Result<Task> {
        let mut task = self
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| Task::new(task_id));

        task.mark_running()?;
        if task.mode() != mode {
            task.iteration_count = 0;
            task.validation = match mode {
                ExecutionMode::Validated => Some(ValidationCycle::new()),
                ExecutionMode::Direct => None,
            };
        }
        if let Some(client_id) = started_by {
            task.started_by = Some(client_id.to_string());
        }
        self.works.insert(task_id.to_string(), work);
        Ok(task.clone())
    }

    pub fn mark_running(&self, task_id: &str) -> Result<Task> {
        self.with_task(task_id, |task| {
            task.mark_running()?;
            Ok(task.clone())
        })
    }

    pub fn mark_completed(&self, task_id: &str, result: Value) -> Result<Terminal> {
        self.with_task(task_id, |task| {
            Ok(if task.mark_completed(result)? {
                self.works.remove(task_id);
                Terminal::Applied(task.clone())
            } else {
                Terminal::Unchanged
            })
        })
    }

    pub fn mark_failed(&self, task_id: &str, failure: FailureKind) -> Result<Terminal> {
        self.with_task(task_id, |task| {
            Ok(if task.mark_failed(failure)? {
                self.works.remove(task_id);
                Terminal::Applied(task.clone())
            } else {
                Terminal::Unchanged
            })
        })
    }

    /// Park a validated task's draft until a reviewer signal arrives.
    pub fn record_draft(&self, task_id: &str, draft: Value) -> Result<Task> {
        self.with_task(task_id, |task| {
            ValidationMachine::record_draft(task, draft)?;
            Ok(task.clone())
        })
    }

    /// Run the validation state machine for one reviewer signal.
    pub fn apply_signal(
        &self,
        task_id: &str,
        signal: Signal,
        max_iterations: u32,
    ) -> Result<AppliedSignal> {
        self.with_task(task_id, |task| {
            let transition = ValidationMachine::next(task, signal, max_iterations)?;
            let work = match transition {
                Transition::Reextract { .. } => {
                    self.works.get(task_id).map(|work| Arc::clone(work.value()))
                }
                Transition::Accepted | Transition::Escalated { .. } => {
                    self.works.remove(task_id);
                    None
                }
            };
            Ok(AppliedSignal {
                transition,
                task: task.clone(),
                work,
            })
        })
    }

    /// Whether a unit of work is attached to the task.
    pub fn has_work(&self, task_id: &str) -> bool {
        self.works.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .get(task_id)
            .map(|task| task.value().clone())
            .ok_or_else(|| TaskhookError::NotFound(task_id.to_string()))
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in self.tasks.iter() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn with_task<T>(&self, task_id: &str, f: impl FnOnce(&mut Task) -> Result<T>) -> Result<T> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskhookError::NotFound(task_id.to_string()))?;
        f(&mut task)
    }
}
