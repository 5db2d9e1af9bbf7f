//! pslaunch-supervisor — owns every process of a job from launch to exit.
//!
//! [`JobSupervisor::start`] fans the launches out (bounded by
//! `fan_out`) and hands back a [`JobHandle`], the single synchronization
//! point for the job: [`JobHandle::wait`] blocks until every process is
//! terminal, [`JobHandle::cancel`] terminates whatever is still running.
//! Each process follows the [`ProcessState`] machine; the final
//! [`JobReport`] carries the per-process table and the overall verdict.

pub mod error;
pub mod report;
pub mod state;
pub mod supervisor;

pub use error::{CancelError, WaitError};
pub use report::{CancelReport, JobReport, StateCounts};
pub use state::{Failure, ProcessState, ProcessStatus};
pub use supervisor::{
    DEFAULT_CANCEL_TIMEOUT, DEFAULT_FAN_OUT, JobHandle, JobSupervisor, SupervisorOptions,
};
