//! Errors of a single delivery attempt to one callback endpoint.
//!
//! These never reach the caller that completed the task: the dispatcher logs
//! them, counts them and retries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The endpoint answered with a non-2xx status.
    #[error("endpoint rejected delivery (status {status}): {body}")]
    Rejected { status: u16, body: String },

    /// DNS, connection refused, timeout and friends.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
