//! Supervisor error types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pslaunch_core::ProcessTarget;

/// A termination request that could not be delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("failed to terminate {target}: {reason}")]
pub struct CancelError {
    pub target: ProcessTarget,
    pub reason: String,
}

/// Errors from [`JobHandle::wait`](crate::JobHandle::wait).
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    /// The deadline passed first. The listed processes are still running.
    #[error("timed out after {elapsed:?} with {} process(es) unfinished", .pending.len())]
    Timeout {
        elapsed: Duration,
        pending: Vec<ProcessTarget>,
    },
}
