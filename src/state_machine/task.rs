use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::validation::{ValidationCycle, ValidationState};
use crate::error::{Result, TaskhookError};

/// Lifecycle status of a task as seen by pollers and subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a task ended up `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The unit of work returned an error.
    Work { message: String },
    /// The unit of work did not finish within the configured timeout.
    Timeout { after_ms: u64 },
    /// The unit of work panicked.
    Panicked { message: String },
    /// The validation loop ran out of re-extraction cycles.
    MaxIterReached { iterations: u32 },
}

impl FailureKind {
    /// Short machine-readable code carried in notifications as `reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            FailureKind::Work { .. } => "work_failed",
            FailureKind::Timeout { .. } => "timeout",
            FailureKind::Panicked { .. } => "panicked",
            FailureKind::MaxIterReached { .. } => "max_iter_reached",
        }
    }

    /// Escalations are final: the task cannot be started again.
    pub fn is_escalation(&self) -> bool {
        matches!(self, FailureKind::MaxIterReached { .. })
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Work { message } => write!(f, "Work failure: {message}"),
            FailureKind::Timeout { after_ms } => write!(f, "Timed out after {after_ms}ms"),
            FailureKind::Panicked { message } => write!(f, "Unit of work panicked: {message}"),
            FailureKind::MaxIterReached { iterations } => {
                write!(f, "Maximum iterations reached ({iterations})")
            }
        }
    }
}

/// How a task reaches its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// The unit of work's return value completes the task.
    #[default]
    Direct,
    /// The unit of work produces a draft that a reviewer accepts or sends back.
    Validated,
}

/// Outcome of a terminal transition request.
#[derive(Debug, Clone)]
pub enum Terminal {
    /// The transition happened; subscribers must be notified about this task.
    Applied(Task),
    /// The task was already in the requested terminal state with the same payload.
    Unchanged,
}

/// One unit of asynchronous work tracked through the lifecycle state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub failure: Option<FailureKind>,
    pub iteration_count: u32,
    pub started_by: Option<String>,
    pub validation: Option<ValidationCycle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            result: None,
            failure: None,
            iteration_count: 0,
            started_by: None,
            validation: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        if self.validation.is_some() {
            ExecutionMode::Validated
        } else {
            ExecutionMode::Direct
        }
    }

    /// pending → running, or failed → running for an ordinary (non-escalated) failure.
    pub fn mark_running(&mut self) -> Result<()> {
        match self.status {
            TaskStatus::Pending => {}
            TaskStatus::Running => return Err(TaskhookError::Conflict(self.id.clone())),
            TaskStatus::Failed if !self.failure.as_ref().is_some_and(FailureKind::is_escalation) => {
                self.failure = None;
                self.completed_at = None;
                if let Some(cycle) = self.validation.as_mut() {
                    cycle.restart();
                }
            }
            from => return Err(self.invalid(from, "start")),
        }
        self.status = TaskStatus::Running;
        self.touch();
        Ok(())
    }

    /// running → completed. Repeating the same completion is a no-op.
    pub fn mark_completed(&mut self, result: Value) -> Result<bool> {
        match self.status {
            TaskStatus::Running => {
                self.status = TaskStatus::Completed;
                self.result = Some(result);
                self.finish();
                Ok(true)
            }
            TaskStatus::Completed if self.result.as_ref() == Some(&result) => Ok(false),
            from => Err(self.invalid(from, "complete")),
        }
    }

    /// running → failed. Repeating the same failure is a no-op.
    pub fn mark_failed(&mut self, failure: FailureKind) -> Result<bool> {
        match self.status {
            TaskStatus::Running => {
                self.status = TaskStatus::Failed;
                self.failure = Some(failure);
                self.finish();
                Ok(true)
            }
            TaskStatus::Failed if self.failure.as_ref() == Some(&failure) => Ok(false),
            from => Err(self.invalid(from, "fail")),
        }
    }

    pub(crate) fn invalid(&self, from: TaskStatus, action: &'static str) -> TaskhookError {
        TaskhookError::InvalidTransition {
            task_id: self.id.clone(),
            from,
            action,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

/// Point-in-time view of a task returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub iteration_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_state: Option<ValidationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            result: task.result.clone(),
            error: task.failure.as_ref().map(ToString::to_string),
            reason: task.failure.as_ref().map(|f| f.reason().to_string()),
            iteration_count: task.iteration_count,
            validation_state: task.validation.as_ref().map(|c| c.state),
            started_by: task.started_by.clone(),
            created_at: task.created_at,
            completed_at: task.completed_at,
            timestamp: Utc::now(),
        }
    }
}
