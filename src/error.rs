use thiserror::Error;

use crate::state_machine::{TaskStatus, ValidationState};

#[derive(Debug, Error)]
pub enum TaskhookError {
    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {0} is already running")]
    Conflict(String),

    #[error("Cannot {action} task {task_id} while it is {from}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        action: &'static str,
    },

    #[error("Task {task_id} is not awaiting validation (currently {state})")]
    NotAwaitingValidation {
        task_id: String,
        state: ValidationState,
    },

    #[error("Task {task_id} is not under a validation policy")]
    NotValidated { task_id: String },

    #[error("Task {task_id} reached the maximum of {max_iterations} iterations")]
    MaxIterationsExceeded { task_id: String, max_iterations: u32 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T, E = TaskhookError> = std::result::Result<T, E>;
