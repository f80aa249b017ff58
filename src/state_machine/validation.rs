use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::{FailureKind, Task, TaskStatus};
use crate::error::{Result, TaskhookError};

/// States of the draft → validate → re-extract loop.
///
/// DRAFTING → AWAITING_VALIDATION → ACCEPTED
///                                → REEXTRACTING → DRAFTING
///                                → MAX_ITER_REACHED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    Drafting,
    AwaitingValidation,
    Reextracting,
    Accepted,
    MaxIterReached,
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationState::Drafting => write!(f, "drafting"),
            ValidationState::AwaitingValidation => write!(f, "awaiting_validation"),
            ValidationState::Reextracting => write!(f, "reextracting"),
            ValidationState::Accepted => write!(f, "accepted"),
            ValidationState::MaxIterReached => write!(f, "max_iter_reached"),
        }
    }
}

/// A reviewer's verdict on the current draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Signal {
    Accept,
    Reextract {
        #[serde(default)]
        comments: Option<String>,
    },
}

/// The result of applying a [`Signal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The draft became the task result.
    Accepted,
    /// A new drafting sub-cycle must run for this iteration.
    Reextract { iteration: u32 },
    /// No cycles left; the task failed with `max_iter_reached`.
    Escalated { iterations: u32 },
}

/// Validation bookkeeping carried by a task run under the iteration policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCycle {
    pub state: ValidationState,
    pub history: Vec<ValidationState>,
    pub draft: Option<Value>,
    /// Reviewer comments accumulated over every re-extraction request.
    pub comments: Vec<String>,
}

impl Default for ValidationCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationCycle {
    pub fn new() -> Self {
        Self {
            state: ValidationState::Drafting,
            history: Vec::new(),
            draft: None,
            comments: Vec::new(),
        }
    }

    fn advance(&mut self, next: ValidationState) {
        self.history.push(self.state);
        self.state = next;
    }

    /// Back to drafting after an ordinary work failure was retried.
    pub(crate) fn restart(&mut self) {
        if self.state != ValidationState::Drafting {
            self.advance(ValidationState::Drafting);
        }
        self.draft = None;
    }
}

/// Drives a task's [`ValidationCycle`].
pub struct ValidationMachine;

impl ValidationMachine {
    /// Store a freshly produced draft and wait for the reviewer.
    pub fn record_draft(task: &mut Task, draft: Value) -> Result<()> {
        if task.status != TaskStatus::Running {
            return Err(task.invalid(task.status, "record a draft for"));
        }
        let task_id = task.id.clone();
        let cycle = Self::cycle(task)?;
        if cycle.state != ValidationState::Drafting {
            return Err(TaskhookError::NotAwaitingValidation {
                task_id,
                state: cycle.state,
            });
        }
        cycle.draft = Some(draft);
        cycle.advance(ValidationState::AwaitingValidation);
        task.touch();
        Ok(())
    }

    /// Apply a reviewer signal.
    ///
    /// - `Accept` completes the task with the current draft.
    /// - `Reextract` starts another drafting sub-cycle while
    ///   `iteration_count < max_iterations`, folding in the comments.
    /// - Otherwise the task fails with [`FailureKind::MaxIterReached`].
    pub fn next(task: &mut Task, signal: Signal, max_iterations: u32) -> Result<Transition> {
        if task.status != TaskStatus::Running {
            return Err(task.invalid(task.status, "validate"));
        }
        let iteration_count = task.iteration_count;
        let task_id = task.id.clone();
        let cycle = Self::cycle(task)?;
        if cycle.state != ValidationState::AwaitingValidation {
            return Err(TaskhookError::NotAwaitingValidation {
                task_id,
                state: cycle.state,
            });
        }

        match signal {
            Signal::Accept => {
                cycle.advance(ValidationState::Accepted);
                let draft = cycle.draft.clone().unwrap_or(Value::Null);
                task.mark_completed(draft)?;
                Ok(Transition::Accepted)
            }
            Signal::Reextract { comments } => {
                if let Some(comments) = comments.filter(|c| !c.trim().is_empty()) {
                    cycle.comments.push(comments);
                }
                if iteration_count < max_iterations {
                    cycle.advance(ValidationState::Reextracting);
                    cycle.advance(ValidationState::Drafting);
                    cycle.draft = None;
                    task.iteration_count += 1;
                    task.touch();
                    Ok(Transition::Reextract {
                        iteration: task.iteration_count,
                    })
                } else {
                    cycle.advance(ValidationState::MaxIterReached);
                    task.mark_failed(FailureKind::MaxIterReached {
                        iterations: iteration_count,
                    })?;
                    Ok(Transition::Escalated {
                        iterations: iteration_count,
                    })
                }
            }
        }
    }

    fn cycle(task: &mut Task) -> Result<&mut ValidationCycle> {
        let task_id = task.id.clone();
        task.validation
            .as_mut()
            .ok_or(TaskhookError::NotValidated { task_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drafted_task(draft: &str) -> Task {
        let mut task = Task::new("doc-1");
        task.validation = Some(ValidationCycle::new());
        task.mark_running().unwrap();
        ValidationMachine::record_draft(&mut task, json!(draft)).unwrap();
        task
    }

    #[test]
    fn accept_completes_with_draft() {
        let mut task = drafted_task("draft v0");
        let t = ValidationMachine::next(&mut task, Signal::Accept, 3).unwrap();
        assert_eq!(t, Transition::Accepted);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!("draft v0")));
        let cycle = task.validation.unwrap();
        assert_eq!(cycle.state, ValidationState::Accepted);
        assert_eq!(
            cycle.history,
            vec![ValidationState::Drafting, ValidationState::AwaitingValidation]
        );
    }

    #[test]
    fn reextract_loops_back_to_drafting() {
        let mut task = drafted_task("draft v0");
        let t = ValidationMachine::next(
            &mut task,
            Signal::Reextract {
                comments: Some("amount is wrong".into()),
            },
            3,
        )
        .unwrap();
        assert_eq!(t, Transition::Reextract { iteration: 1 });
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.iteration_count, 1);
        let cycle = task.validation.as_ref().unwrap();
        assert_eq!(cycle.state, ValidationState::Drafting);
        assert_eq!(cycle.comments, vec!["amount is wrong".to_string()]);
        assert!(cycle.draft.is_none());
    }

    #[test]
    fn fourth_reextract_escalates_at_three() {
        let mut task = drafted_task("draft v0");
        for expected in 1..=3 {
            let t = ValidationMachine::next(&mut task, Signal::Reextract { comments: None }, 3)
                .unwrap();
            assert_eq!(t, Transition::Reextract { iteration: expected });
            ValidationMachine::record_draft(&mut task, json!(format!("draft v{expected}")))
                .unwrap();
        }

        let t = ValidationMachine::next(&mut task, Signal::Reextract { comments: None }, 3).unwrap();
        assert_eq!(t, Transition::Escalated { iterations: 3 });
        assert_eq!(task.iteration_count, 3);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.failure,
            Some(FailureKind::MaxIterReached { iterations: 3 })
        );
        assert_eq!(
            task.validation.unwrap().state,
            ValidationState::MaxIterReached
        );
    }

    #[test]
    fn signal_while_drafting_is_rejected() {
        let mut task = Task::new("doc-2");
        task.validation = Some(ValidationCycle::new());
        task.mark_running().unwrap();
        let err = ValidationMachine::next(&mut task, Signal::Accept, 3).unwrap_err();
        assert!(matches!(
            err,
            TaskhookError::NotAwaitingValidation {
                state: ValidationState::Drafting,
                ..
            }
        ));
    }

    #[test]
    fn signal_on_direct_task_is_rejected() {
        let mut task = Task::new("plain");
        task.mark_running().unwrap();
        let err = ValidationMachine::next(&mut task, Signal::Accept, 3).unwrap_err();
        assert!(matches!(err, TaskhookError::NotValidated { .. }));
    }

    #[test]
    fn blank_comments_are_not_accumulated() {
        let mut task = drafted_task("draft v0");
        ValidationMachine::next(
            &mut task,
            Signal::Reextract {
                comments: Some("   ".into()),
            },
            3,
        )
        .unwrap();
        assert!(task.validation.unwrap().comments.is_empty());
    }

    #[test]
    fn signal_deserializes_from_decision_tag() {
        let accept: Signal = serde_json::from_str(r#"{"decision":"accept"}"#).unwrap();
        assert_eq!(accept, Signal::Accept);

        let reextract: Signal =
            serde_json::from_str(r#"{"decision":"reextract","comments":"fix totals"}"#).unwrap();
        assert_eq!(
            reextract,
            Signal::Reextract {
                comments: Some("fix totals".into())
            }
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(ValidationState::Drafting.to_string(), "drafting");
        assert_eq!(
            ValidationState::AwaitingValidation.to_string(),
            "awaiting_validation"
        );
        assert_eq!(ValidationState::MaxIterReached.to_string(), "max_iter_reached");
    }
}
