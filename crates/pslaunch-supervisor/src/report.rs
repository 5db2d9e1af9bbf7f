//! Final job report.

use std::fmt;

use serde::{Deserialize, Serialize};

use pslaunch_core::ProcessTarget;

use crate::error::CancelError;
use crate::state::{ProcessState, ProcessStatus};

/// Per-process outcome of a job plus the overall verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub processes: Vec<ProcessStatus>,
    /// True only if every process exited with status 0.
    pub success: bool,
}

/// How many processes are in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobReport {
    pub fn new(processes: Vec<ProcessStatus>) -> Self {
        let success = processes
            .iter()
            .all(|p| p.state == ProcessState::Succeeded);
        Self { processes, success }
    }

    /// Process exit code for the launcher itself.
    pub fn exit_code(&self) -> i32 {
        if self.success { 0 } else { 1 }
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for p in &self.processes {
            match p.state {
                ProcessState::Pending => counts.pending += 1,
                ProcessState::Running => counts.running += 1,
                ProcessState::Succeeded => counts.succeeded += 1,
                ProcessState::Failed(_) => counts.failed += 1,
                ProcessState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Processes that did not succeed, in launch order.
    pub fn failures(&self) -> impl Iterator<Item = &ProcessStatus> {
        self.processes
            .iter()
            .filter(|p| matches!(p.state, ProcessState::Failed(_)))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .processes
            .iter()
            .map(|p| p.target.to_string().len())
            .max()
            .unwrap_or(0);
        for p in &self.processes {
            writeln!(f, "{:<width$}  {}", p.target.to_string(), p.state)?;
        }
        let c = self.counts();
        write!(
            f,
            "{}: {} succeeded, {} failed, {} cancelled",
            if self.success { "job succeeded" } else { "job failed" },
            c.succeeded,
            c.failed,
            c.cancelled
        )?;
        if c.pending + c.running > 0 {
            write!(f, ", {} unfinished", c.pending + c.running)?;
        }
        Ok(())
    }
}

/// Result of [`JobHandle::cancel`](crate::JobHandle::cancel).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReport {
    /// Processes that were sent a termination request.
    pub cancelled: Vec<ProcessTarget>,
    pub errors: Vec<CancelError>,
}

impl CancelReport {
    /// Nothing was left to cancel.
    pub fn is_noop(&self) -> bool {
        self.cancelled.is_empty() && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Failure;
    use pslaunch_core::Role;

    fn status(rank: u32, state: ProcessState) -> ProcessStatus {
        ProcessStatus {
            target: ProcessTarget {
                host: "proj5".into(),
                role: Role::Worker,
                rank,
            },
            state,
        }
    }

    #[test]
    fn success_requires_every_process_to_exit_zero() {
        let ok = JobReport::new(vec![
            status(0, ProcessState::Succeeded),
            status(1, ProcessState::Succeeded),
        ]);
        assert!(ok.success);
        assert_eq!(ok.exit_code(), 0);

        let failed = JobReport::new(vec![
            status(0, ProcessState::Succeeded),
            status(1, ProcessState::Failed(Failure::Runtime { exit_code: Some(2) })),
        ]);
        assert!(!failed.success);
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(failed.failures().count(), 1);

        let cancelled = JobReport::new(vec![status(0, ProcessState::Cancelled)]);
        assert!(!cancelled.success);
    }

    #[test]
    fn text_rendering_lists_every_process() {
        let report = JobReport::new(vec![
            status(0, ProcessState::Succeeded),
            status(1, ProcessState::Failed(Failure::Runtime { exit_code: Some(2) })),
        ]);
        let text = report.to_string();
        assert!(text.contains("worker#0@proj5  succeeded"));
        assert!(text.contains("worker#1@proj5  failed (exited with status 2)"));
        assert!(text.ends_with("job failed: 1 succeeded, 1 failed, 0 cancelled"));
    }

    #[test]
    fn json_carries_state_and_failure_kind() {
        let report = JobReport::new(vec![status(
            0,
            ProcessState::Failed(Failure::Runtime { exit_code: Some(2) }),
        )]);
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["processes"][0]["state"]["failed"]["kind"], "runtime");
        assert_eq!(value["processes"][0]["target"]["role"], "worker");
    }
}
