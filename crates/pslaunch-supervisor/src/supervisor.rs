//! Job supervisor: launches every process concurrently and follows each
//! one to a terminal state.
//!
//! One task per process owns its [`RemoteProcess`] handle. The task is the
//! only writer of that process's row in the shared status table, and it
//! receives cancellation requests over its own channel so a termination
//! never races with the task's own `wait`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use pslaunch_core::{ProcessSpec, ProcessTarget};
use pslaunch_remote::{Launcher, ProcessError, RemoteProcess};

use crate::error::{CancelError, WaitError};
use crate::report::{CancelReport, JobReport};
use crate::state::{Failure, ProcessState, ProcessStatus, StatusTable};

/// Default maximum number of launches in flight.
pub const DEFAULT_FAN_OUT: usize = 16;

/// Default time `cancel` waits for termination requests to be answered.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Maximum launches in flight at once. Zero is treated as one.
    pub fan_out: usize,
    /// Cancel every other process as soon as one fails.
    pub fail_fast: bool,
    /// How long `cancel` waits for answers. Processes that have not
    /// answered by then are reported as undeliverable.
    pub cancel_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            fan_out: DEFAULT_FAN_OUT,
            fail_fast: false,
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
        }
    }
}

/// `Ok(true)` if a termination was delivered, `Ok(false)` if one had
/// already been delivered earlier.
type CancelReply = oneshot::Sender<Result<bool, CancelError>>;

struct Control {
    target: ProcessTarget,
    requests: mpsc::UnboundedSender<CancelReply>,
}

/// Starts jobs through a [`Launcher`].
pub struct JobSupervisor {
    launcher: Arc<dyn Launcher>,
    options: SupervisorOptions,
}

impl JobSupervisor {
    pub fn new(launcher: Arc<dyn Launcher>, options: SupervisorOptions) -> Self {
        Self { launcher, options }
    }

    /// Issue every launch and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, specs: Vec<ProcessSpec>) -> JobHandle {
        let fan_out = self.options.fan_out.max(1);
        info!(
            processes = specs.len(),
            fan_out,
            fail_fast = self.options.fail_fast,
            "starting job"
        );

        let table = Arc::new(Mutex::new(StatusTable::new(
            specs.iter().map(|s| s.target.clone()),
        )));
        let (remaining_tx, remaining_rx) = watch::channel(specs.len());
        let remaining_tx = Arc::new(remaining_tx);
        let permits = Arc::new(Semaphore::new(fan_out));
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();

        let mut controls = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            let (requests, control_rx) = mpsc::unbounded_channel();
            controls.push(Control {
                target: spec.target.clone(),
                requests,
            });
            let ctx = ProcessContext {
                index,
                target: spec.target.clone(),
                launcher: self.launcher.clone(),
                permits: permits.clone(),
                table: table.clone(),
                remaining: remaining_tx.clone(),
                failed: failed_tx.clone(),
            };
            tokio::spawn(supervise_process(ctx, spec, control_rx));
        }

        let controls = Arc::new(controls);
        let cancel_timeout = self.options.cancel_timeout;
        if self.options.fail_fast {
            tokio::spawn(cancel_on_first_failure(
                failed_rx,
                controls.clone(),
                cancel_timeout,
            ));
        }

        JobHandle {
            table,
            controls,
            remaining: remaining_rx,
            cancel_timeout,
        }
    }
}

/// The single synchronization point for a running job.
pub struct JobHandle {
    table: Arc<Mutex<StatusTable>>,
    controls: Arc<Vec<Control>>,
    remaining: watch::Receiver<usize>,
    cancel_timeout: Duration,
}

impl JobHandle {
    /// Wait until every process is terminal.
    ///
    /// With a deadline, returns [`WaitError::Timeout`] once it passes and
    /// leaves the unfinished processes running. The future may also be
    /// dropped at any point without affecting the job.
    pub async fn wait(&self, deadline: Option<Duration>) -> Result<JobReport, WaitError> {
        let mut remaining = self.remaining.clone();
        let done = async move {
            let _ = remaining.wait_for(|n| *n == 0).await;
        };

        if let Some(limit) = deadline {
            if tokio::time::timeout(limit, done).await.is_err() {
                let pending = self.table.lock().await.unfinished();
                warn!(
                    waited = ?limit,
                    unfinished = pending.len(),
                    "deadline passed before job finished"
                );
                return Err(WaitError::Timeout {
                    elapsed: limit,
                    pending,
                });
            }
        } else {
            done.await;
        }

        let report = self.report().await;
        info!(
            success = report.success,
            processes = report.processes.len(),
            "job finished"
        );
        Ok(report)
    }

    /// Send termination to every process that has not finished.
    ///
    /// Processes already in a terminal state are skipped. Undeliverable
    /// terminations, including requests still unanswered after
    /// `cancel_timeout`, are collected in the report and do not hold up
    /// the others.
    pub async fn cancel(&self) -> CancelReport {
        info!("cancelling job");
        cancel_all(&self.controls, self.cancel_timeout).await
    }

    /// Current status table, in launch order.
    pub async fn snapshot(&self) -> Vec<ProcessStatus> {
        self.table.lock().await.rows().to_vec()
    }

    /// Report built from the current table, whether or not the job is done.
    pub async fn report(&self) -> JobReport {
        JobReport::new(self.snapshot().await)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

struct ProcessContext {
    index: usize,
    target: ProcessTarget,
    launcher: Arc<dyn Launcher>,
    permits: Arc<Semaphore>,
    table: Arc<Mutex<StatusTable>>,
    remaining: Arc<watch::Sender<usize>>,
    failed: mpsc::UnboundedSender<ProcessTarget>,
}

impl ProcessContext {
    async fn set(&self, next: ProcessState) {
        let failed = matches!(next, ProcessState::Failed(_));
        let terminal = self.table.lock().await.transition(self.index, next);
        if terminal {
            self.remaining.send_modify(|n| *n = n.saturating_sub(1));
            if failed {
                // Nobody listens unless fail-fast is on.
                let _ = self.failed.send(self.target.clone());
            }
        }
    }
}

async fn supervise_process(
    ctx: ProcessContext,
    spec: ProcessSpec,
    mut control: mpsc::UnboundedReceiver<CancelReply>,
) {
    let target = &ctx.target;

    let permit = tokio::select! {
        permit = ctx.permits.clone().acquire_owned() => permit.ok(),
        Some(reply) = control.recv() => {
            debug!(process = %target, "cancelled before launch");
            ctx.set(ProcessState::Cancelled).await;
            let _ = reply.send(Ok(true));
            return;
        }
    };

    let launched = ctx.launcher.launch(&spec).await;
    drop(permit);

    let mut process: Box<dyn RemoteProcess> = match launched {
        Ok(process) => process,
        Err(e) => {
            error!(process = %target, kind = %e.kind, error = %e.message, "launch failed");
            ctx.set(ProcessState::Failed(Failure::Launch { error: e })).await;
            return;
        }
    };
    ctx.set(ProcessState::Running).await;

    let mut terminated = false;
    let outcome = loop {
        tokio::select! {
            status = process.wait() => break status,
            Some(reply) = control.recv() => {
                if terminated {
                    let _ = reply.send(Ok(false));
                    continue;
                }
                match process.terminate().await {
                    Ok(()) => {
                        debug!(process = %target, "termination delivered");
                        terminated = true;
                        let _ = reply.send(Ok(true));
                    }
                    Err(e) => {
                        warn!(process = %target, error = %e, "termination not delivered");
                        let _ = reply.send(Err(CancelError {
                            target: target.clone(),
                            reason: e.to_string(),
                        }));
                    }
                }
            }
        }
    };

    let next = match outcome {
        Ok(status) if status.success() => {
            info!(process = %target, "process exited successfully");
            ProcessState::Succeeded
        }
        Ok(_) | Err(_) if terminated => {
            info!(process = %target, "process cancelled");
            ProcessState::Cancelled
        }
        Ok(status) => {
            error!(process = %target, code = ?status.code, "process failed");
            ProcessState::Failed(Failure::Runtime {
                exit_code: status.code,
            })
        }
        Err(ProcessError::Launch(e)) => {
            error!(process = %target, kind = %e.kind, error = %e.message, "process never started");
            ProcessState::Failed(Failure::Launch { error: e })
        }
        Err(e) => {
            error!(process = %target, error = %e, "lost track of process");
            ProcessState::Failed(Failure::Lost {
                message: e.to_string(),
            })
        }
    };
    ctx.set(next).await;
}

async fn cancel_all(controls: &[Control], timeout: Duration) -> CancelReport {
    let mut replies = Vec::new();
    for control in controls {
        let (reply_tx, reply_rx) = oneshot::channel();
        // A closed channel means the process already finished.
        if control.requests.send(reply_tx).is_ok() {
            replies.push((&control.target, reply_rx));
        }
    }

    // One deadline for the whole batch; every process terminates in its
    // own task, so the replies arrive concurrently.
    let deadline = tokio::time::Instant::now() + timeout;
    let mut report = CancelReport::default();
    for (target, reply) in replies {
        match tokio::time::timeout_at(deadline, reply).await {
            Ok(Ok(Ok(true))) => report.cancelled.push(target.clone()),
            Ok(Ok(Ok(false))) => {}
            Ok(Ok(Err(e))) => report.errors.push(e),
            // The process finished before it saw the request.
            Ok(Err(_)) => {}
            Err(_) => report.errors.push(CancelError {
                target: target.clone(),
                reason: format!("no answer within {timeout:?}"),
            }),
        }
    }

    if !report.errors.is_empty() {
        warn!(
            cancelled = report.cancelled.len(),
            undelivered = report.errors.len(),
            "cancellation incomplete"
        );
    } else {
        debug!(cancelled = report.cancelled.len(), "cancellation delivered");
    }
    report
}

async fn cancel_on_first_failure(
    mut failed: mpsc::UnboundedReceiver<ProcessTarget>,
    controls: Arc<Vec<Control>>,
    timeout: Duration,
) {
    if let Some(target) = failed.recv().await {
        warn!(process = %target, "process failed, cancelling the rest of the job");
        let report = cancel_all(&controls, timeout).await;
        for e in &report.errors {
            error!(process = %e.target, reason = %e.reason, "fail-fast could not terminate process");
        }
    }
}
