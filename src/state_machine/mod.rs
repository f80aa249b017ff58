mod task;
mod validation;

pub use task::{ExecutionMode, FailureKind, Task, TaskSnapshot, TaskStatus, Terminal};
pub use validation::{Signal, Transition, ValidationCycle, ValidationMachine, ValidationState};
