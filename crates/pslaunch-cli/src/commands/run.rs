use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};

use pslaunch_remote::HostRouter;
use pslaunch_supervisor::{
    CancelReport, JobHandle, JobReport, JobSupervisor, SupervisorOptions, WaitError,
};

use crate::{LaunchArgs, OutputFormat};

use super::{EXIT_SUCCESS, EXIT_TIMEOUT, mode};

/// How long to wait for processes to exit after an interrupt.
const SETTLE_AFTER_CANCEL: Duration = Duration::from_secs(30);

pub async fn launch(args: LaunchArgs, report: bool) -> anyhow::Result<u8> {
    let (config, job) = super::resolve(&args.job, mode(report))?;

    if args.dry_run {
        super::plan::print_plan(&job, args.format)?;
        return Ok(EXIT_SUCCESS);
    }

    if let Some(table) = &job.node_table {
        table
            .write(&job.hosts)
            .context("failed to write node table")?;
    }

    let router = HostRouter::from_config(&config.launch, &job.name);
    let supervisor = JobSupervisor::new(
        Arc::new(router),
        SupervisorOptions {
            fan_out: config.launch.fan_out,
            fail_fast: args.fail_fast || config.launch.fail_fast,
            ..SupervisorOptions::default()
        },
    );
    let deadline = args
        .timeout
        .or(config.launch.timeout_secs)
        .map(Duration::from_secs);

    info!(
        job = %job.name,
        program = %job.program,
        processes = job.specs.len(),
        deadline = ?deadline,
        "launching job"
    );
    let handle = supervisor.start(job.specs);

    let outcome = tokio::select! {
        outcome = handle.wait(deadline) => outcome,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling job");
            cancel_and_settle(&handle).await
        }
    };

    match outcome {
        Ok(report) => {
            print_report(&report, args.format)?;
            Ok(report.exit_code() as u8)
        }
        Err(WaitError::Timeout { elapsed, pending }) => {
            // Exiting drops the runtime, which kills local children and ssh
            // clients. Programs already running on remote hosts survive.
            error!(
                waited = ?elapsed,
                unfinished = pending.len(),
                "job did not finish in time; stopping local processes, remote programs keep running (see `pslaunch kill`)"
            );
            print_report(&handle.report().await, args.format)?;
            Ok(EXIT_TIMEOUT)
        }
    }
}

fn log_cancel(report: &CancelReport) {
    for e in &report.errors {
        error!(process = %e.target, reason = %e.reason, "could not terminate process");
    }
    info!(
        cancelled = report.cancelled.len(),
        undelivered = report.errors.len(),
        "cancellation sent"
    );
}

pub fn print_report(report: &JobReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => println!("{report}"),
        OutputFormat::Json => println!("{}", report.to_json().context("failed to encode report")?),
    }
    Ok(())
}

async fn cancel_and_settle(handle: &JobHandle) -> Result<JobReport, WaitError> {
    log_cancel(&handle.cancel().await);
    handle.wait(Some(SETTLE_AFTER_CANCEL)).await
}
