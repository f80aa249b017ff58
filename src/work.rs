//! The opaque unit of work a task runs.
//!
//! Real extraction lives outside this crate; the engine only needs something
//! that takes a [`WorkInput`] and eventually returns a JSON payload or fails.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkError {
    #[error("{0}")]
    Failed(String),
}

/// Everything a unit of work learns about the cycle it runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkInput {
    pub task_id: String,
    /// 0 for the first draft, incremented on every re-extraction.
    pub iteration: u32,
    /// Reviewer comments gathered so far, oldest first.
    pub comments: Vec<String>,
}

impl WorkInput {
    pub fn first(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            iteration: 0,
            comments: Vec::new(),
        }
    }
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn run(&self, input: WorkInput) -> Result<Value, WorkError>;
}

/// Stand-in for the extraction pipeline: waits, then reports processed data.
#[derive(Debug, Clone)]
pub struct SimulatedExtraction {
    pub duration: Duration,
}

impl SimulatedExtraction {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl UnitOfWork for SimulatedExtraction {
    async fn run(&self, input: WorkInput) -> Result<Value, WorkError> {
        sleep(self.duration).await;

        let mut result = format!(
            "Task {} completed successfully with data: [processed_data_123]",
            input.task_id
        );
        if input.iteration > 0 {
            result.push_str(&format!(" (iteration {}", input.iteration));
            if !input.comments.is_empty() {
                result.push_str(&format!(", addressing: {}", input.comments.join("; ")));
            }
            result.push(')');
        }
        Ok(Value::String(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_first_draft() {
        let work = SimulatedExtraction::new(Duration::ZERO);
        let out = work.run(WorkInput::first("t1")).await.unwrap();
        assert_eq!(
            out,
            Value::String("Task t1 completed successfully with data: [processed_data_123]".into())
        );
    }

    #[tokio::test]
    async fn simulated_reextraction_folds_comments() {
        let work = SimulatedExtraction::new(Duration::ZERO);
        let out = work
            .run(WorkInput {
                task_id: "doc".into(),
                iteration: 2,
                comments: vec!["wrong date".into(), "missing vendor".into()],
            })
            .await
            .unwrap();
        let text = out.as_str().unwrap();
        assert!(text.ends_with("(iteration 2, addressing: wrong date; missing vendor)"));
    }

    #[test]
    fn work_error_display() {
        assert_eq!(WorkError::Failed("no pages".into()).to_string(), "no pages");
    }
}
