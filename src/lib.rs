//! Task lifecycle engine with webhook fan-out.
//!
//! Clients register callback endpoints for a task id, start the task, and get
//! a POST on every endpoint once the task completes or fails. Tasks started
//! with validation go through a draft/review loop first, bounded by a maximum
//! number of re-extractions.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod policy;
pub mod registry;
pub mod server;
pub mod state_machine;
pub mod store;
pub mod webhook;
pub mod work;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::Engine;
pub use error::{Result, TaskhookError};
