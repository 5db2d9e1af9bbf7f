//! Launcher error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pslaunch_core::ProcessTarget;

/// Result type alias for launch operations.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Why a process could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchErrorKind {
    /// The host did not answer (DNS, routing, connect timeout).
    Unreachable,
    /// The host answered but refused our credentials.
    AuthFailed,
    /// The program (or its working directory) does not exist on the host.
    MissingExecutable,
    /// The local transport process could not be spawned.
    Spawn,
}

impl fmt::Display for LaunchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LaunchErrorKind::Unreachable => "host unreachable",
            LaunchErrorKind::AuthFailed => "authentication failed",
            LaunchErrorKind::MissingExecutable => "missing executable",
            LaunchErrorKind::Spawn => "spawn failed",
        })
    }
}

/// A process that could not be started, attributed to its target.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("failed to launch {target}: {kind}: {message}")]
pub struct LaunchError {
    pub target: ProcessTarget,
    pub kind: LaunchErrorKind,
    pub message: String,
}

impl LaunchError {
    pub fn new(target: &ProcessTarget, kind: LaunchErrorKind, message: impl Into<String>) -> Self {
        Self {
            target: target.clone(),
            kind,
            message: message.into(),
        }
    }
}

/// Errors from a process that was started successfully.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to deliver termination: {0}")]
    Terminate(String),

    /// The transport reported, after dispatch, that the process never started.
    #[error(transparent)]
    Launch(LaunchError),

    #[error("connection to host lost: {0}")]
    Disconnected(String),
}

/// A host-wide kill request that could not be carried out.
#[derive(Debug, Clone, Error)]
#[error("failed to kill {program} on {host}: {message}")]
pub struct KillError {
    pub host: String,
    pub program: String,
    pub message: String,
}
