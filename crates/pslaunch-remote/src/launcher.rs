//! Launcher and process handle traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pslaunch_core::{ProcessSpec, ProcessTarget};

use crate::error::{KillError, LaunchResult, ProcessError};

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Starts processes on cluster hosts.
///
/// `launch` must return as soon as the process has been dispatched; it
/// may block briefly on connection setup but never on process completion.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &ProcessSpec) -> LaunchResult<Box<dyn RemoteProcess>>;

    /// Kill every process running `program` on `host`.
    ///
    /// Returns whether anything matched.
    async fn kill_all(&self, host: &str, program: &str) -> Result<bool, KillError>;
}

/// Handle to one dispatched process.
///
/// `wait` must be cancel-safe: the supervisor races it against
/// cancellation requests and calls it again after a failed termination.
#[async_trait]
pub trait RemoteProcess: Send {
    fn target(&self) -> &ProcessTarget;

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;

    /// Ask the process to stop. Does not wait for it to exit.
    async fn terminate(&mut self) -> Result<(), ProcessError>;
}
