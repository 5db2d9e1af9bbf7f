pub mod init;
pub mod kill;
pub mod plan;
pub mod run;

use anyhow::Context;

use pslaunch_core::{
    HostList, JobConfig, LaunchMode, ParamValue, ParameterSet, ResolveOptions, ResolvedJob,
};

use crate::JobArgs;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
/// Same convention as coreutils `timeout`.
pub const EXIT_TIMEOUT: u8 = 124;

pub fn mode(report: bool) -> LaunchMode {
    if report {
        LaunchMode::Report
    } else {
        LaunchMode::Train
    }
}

/// Load the job file and apply `--hostfile`.
pub fn load_config(args: &JobArgs) -> anyhow::Result<JobConfig> {
    let mut config = JobConfig::from_file(&args.job)
        .with_context(|| format!("failed to load job file {}", args.job.display()))?;
    if let Some(hostfile) = &args.hostfile {
        // Relative to the caller, not to the job file.
        config.job.hostfile = std::env::current_dir()?.join(hostfile);
    }
    Ok(config)
}

pub fn load_hosts(config: &JobConfig) -> anyhow::Result<HostList> {
    let path = config.hostfile_path();
    HostList::from_file_with(&path, config.cluster.allow_duplicate_hosts)
        .with_context(|| format!("failed to load hostfile {}", path.display()))
}

pub fn resolve_options(args: &JobArgs, mode: LaunchMode) -> ResolveOptions {
    let overrides: ParameterSet = args
        .overrides
        .iter()
        .map(|(key, raw)| (key.clone(), ParamValue::parse_loose(raw)))
        .collect();
    ResolveOptions {
        mode,
        dataset: args.dataset.clone(),
        overrides,
    }
}

/// Load, validate, and render the whole job. Nothing is launched.
pub fn resolve(args: &JobArgs, mode: LaunchMode) -> anyhow::Result<(JobConfig, ResolvedJob)> {
    let config = load_config(args)?;
    let job = config
        .resolve(&resolve_options(args, mode))
        .context("failed to resolve job")?;
    Ok((config, job))
}
