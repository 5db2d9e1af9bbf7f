//! Per-process state machine.
//!
//! ```text
//! Pending ──► Running ──► Succeeded
//!    │           ├──────► Failed
//!    │           └──────► Cancelled
//!    ├──────────────────► Failed     (launch error)
//!    └──────────────────► Cancelled  (cancelled before launch)
//! ```
//!
//! Terminal states are final.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use pslaunch_core::ProcessTarget;
use pslaunch_remote::LaunchError;

/// Why a process ended up in [`ProcessState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// The process never started.
    Launch { error: LaunchError },
    /// The process started and exited non-zero. `None` means it was
    /// killed by a signal nobody asked for.
    Runtime { exit_code: Option<i32> },
    /// The process handle broke while waiting for it.
    Lost { message: String },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Launch { error } => write!(f, "launch failed: {}: {}", error.kind, error.message),
            Failure::Runtime {
                exit_code: Some(code),
            } => write!(f, "exited with status {code}"),
            Failure::Runtime { exit_code: None } => f.write_str("killed by signal"),
            Failure::Lost { message } => write!(f, "lost: {message}"),
        }
    }
}

/// Lifecycle of one launched process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Pending,
    Running,
    Succeeded,
    Failed(Failure),
    Cancelled,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Succeeded | ProcessState::Failed(_) | ProcessState::Cancelled
        )
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: &ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Pending, Running | Failed(_) | Cancelled)
                | (Running, Succeeded | Failed(_) | Cancelled)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProcessState::Pending => "pending",
            ProcessState::Running => "running",
            ProcessState::Succeeded => "succeeded",
            ProcessState::Failed(_) => "failed",
            ProcessState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Failed(failure) => write!(f, "failed ({failure})"),
            other => f.write_str(other.name()),
        }
    }
}

/// One row of the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub target: ProcessTarget,
    pub state: ProcessState,
}

/// The supervisor's shared status table, indexed in launch order.
#[derive(Debug, Default)]
pub(crate) struct StatusTable {
    rows: Vec<ProcessStatus>,
}

impl StatusTable {
    pub(crate) fn new(targets: impl IntoIterator<Item = ProcessTarget>) -> Self {
        Self {
            rows: targets
                .into_iter()
                .map(|target| ProcessStatus {
                    target,
                    state: ProcessState::Pending,
                })
                .collect(),
        }
    }

    /// Apply a transition. Returns `true` when it moved the process into
    /// a terminal state; illegal transitions are logged and ignored.
    pub(crate) fn transition(&mut self, index: usize, next: ProcessState) -> bool {
        let Some(row) = self.rows.get_mut(index) else {
            warn!(index, "transition for unknown process");
            return false;
        };
        if !row.state.can_transition_to(&next) {
            warn!(
                process = %row.target,
                from = row.state.name(),
                to = next.name(),
                "ignoring illegal state transition"
            );
            return false;
        }
        row.state = next;
        row.state.is_terminal()
    }

    pub(crate) fn rows(&self) -> &[ProcessStatus] {
        &self.rows
    }

    pub(crate) fn unfinished(&self) -> Vec<ProcessTarget> {
        self.rows
            .iter()
            .filter(|row| !row.state.is_terminal())
            .map(|row| row.target.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pslaunch_core::Role;

    fn target(rank: u32) -> ProcessTarget {
        ProcessTarget {
            host: "proj5".into(),
            role: Role::Worker,
            rank,
        }
    }

    #[test]
    fn lifecycle_edges() {
        use ProcessState::*;
        let failed = Failed(Failure::Runtime { exit_code: Some(1) });

        assert!(Pending.can_transition_to(&Running));
        assert!(Pending.can_transition_to(&failed));
        assert!(Pending.can_transition_to(&Cancelled));
        assert!(Running.can_transition_to(&Succeeded));
        assert!(Running.can_transition_to(&Cancelled));

        assert!(!Pending.can_transition_to(&Succeeded));
        assert!(!Running.can_transition_to(&Pending));
        for terminal in [Succeeded, failed.clone(), Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Running, Succeeded, failed.clone(), Cancelled] {
                assert!(!terminal.can_transition_to(&next));
            }
        }
    }

    #[test]
    fn table_refuses_to_leave_terminal_state() {
        let mut table = StatusTable::new([target(0)]);
        assert!(!table.transition(0, ProcessState::Running));
        assert!(table.transition(0, ProcessState::Succeeded));
        assert!(!table.transition(0, ProcessState::Cancelled));
        assert_eq!(table.rows()[0].state, ProcessState::Succeeded);
        assert!(table.unfinished().is_empty());
    }

    #[test]
    fn unfinished_lists_pending_and_running() {
        let mut table = StatusTable::new([target(0), target(1), target(2)]);
        table.transition(0, ProcessState::Running);
        table.transition(2, ProcessState::Cancelled);
        assert_eq!(table.unfinished(), vec![target(0), target(1)]);
    }

    #[test]
    fn failure_descriptions() {
        assert_eq!(
            Failure::Runtime { exit_code: Some(3) }.to_string(),
            "exited with status 3"
        );
        assert_eq!(
            ProcessState::Failed(Failure::Runtime { exit_code: None }).to_string(),
            "failed (killed by signal)"
        );
    }
}
