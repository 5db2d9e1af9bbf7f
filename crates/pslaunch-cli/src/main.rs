//! pslaunch — launches parameter-server training jobs across a cluster.
//!
//! # Usage
//!
//! ```text
//! pslaunch run --job lr.toml --dataset rcv --set alpha=0.001
//! pslaunch report --job lr.toml
//! pslaunch plan --job lr.toml
//! pslaunch kill --job lr.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use pslaunch_core::ConfigError;

mod commands;

#[derive(Parser)]
#[command(
    name = "pslaunch",
    about = "Parameter-server job launcher",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the training job and wait for every process to exit.
    Run(LaunchArgs),
    /// Launch the loss-report job over dumped models.
    ///
    /// Uses [report].program and merges [report.params] over the job's
    /// parameters.
    Report(LaunchArgs),
    /// Print the rank plan and command lines without launching anything.
    Plan {
        #[command(flatten)]
        job: JobArgs,
        /// Plan the report job instead of the training job.
        #[arg(long)]
        report: bool,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Kill leftover job processes on every host of the hostfile.
    Kill {
        #[command(flatten)]
        job: JobArgs,
        /// Kill the report program instead of the training program.
        #[arg(long)]
        report: bool,
    },
    /// Write a starter job file.
    Init {
        /// Where to write the job file.
        #[arg(default_value = "job.toml")]
        path: PathBuf,
        #[arg(long, default_value = "lr")]
        name: String,
        #[arg(long, default_value = "build/LinearClassifier")]
        program: String,
        #[arg(long, default_value = "machinefiles/local")]
        hostfile: String,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Selects and adjusts the job.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Job file.
    #[arg(short, long, default_value = "job.toml")]
    pub job: PathBuf,
    /// Use this hostfile instead of job.hostfile.
    #[arg(long)]
    pub hostfile: Option<PathBuf>,
    /// Dataset preset from [datasets.<name>].
    #[arg(short, long)]
    pub dataset: Option<String>,
    /// Override a parameter; repeatable. Applied after every other layer.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
    pub overrides: Vec<(String, String)>,
}

#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub job: JobArgs,
    /// Validate and print the command lines, then exit.
    #[arg(long)]
    pub dry_run: bool,
    /// Stop waiting after this many seconds; overrides launch.timeout_secs.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
    /// Cancel the whole job on the first failure.
    #[arg(long)]
    pub fail_fast: bool,
    /// Final report format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,pslaunch=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Exit status for errors that escape a command: 2 for configuration
/// problems, 1 for everything else.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<ConfigError>()) {
        commands::EXIT_CONFIG
    } else {
        commands::EXIT_FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("error: invalid RUST_LOG: {e}");
        return ExitCode::from(commands::EXIT_CONFIG);
    }

    let result = match cli.command {
        Commands::Run(args) => commands::run::launch(args, false).await,
        Commands::Report(args) => commands::run::launch(args, true).await,
        Commands::Plan {
            job,
            report,
            format,
        } => commands::plan::plan(&job, report, format),
        Commands::Kill { job, report } => commands::kill::kill(&job, report).await,
        Commands::Init {
            path,
            name,
            program,
            hostfile,
            force,
        } => commands::init::init(&path, &name, &program, &hostfile, force),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_parse() {
        assert_eq!(
            parse_override("alpha=0.001").unwrap(),
            ("alpha".to_string(), "0.001".to_string())
        );
        assert_eq!(
            parse_override("model_input=/a=b").unwrap(),
            ("model_input".to_string(), "/a=b".to_string())
        );
        assert!(parse_override("alpha").is_err());
        assert!(parse_override("=1").is_err());
    }

    #[test]
    fn run_arguments() {
        let cli = Cli::try_parse_from([
            "pslaunch", "run", "--job", "lr.toml", "--set", "alpha=0.1", "--set",
            "num_iters=10", "--timeout", "60", "--format", "json",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.job.job, PathBuf::from("lr.toml"));
        assert_eq!(args.job.overrides.len(), 2);
        assert_eq!(args.timeout, Some(60));
        assert_eq!(args.format, OutputFormat::Json);
        assert!(!args.dry_run);
    }

    #[test]
    fn config_errors_map_to_exit_two() {
        let err = anyhow::Error::new(ConfigError::MissingParam("input".into()))
            .context("failed to resolve job");
        assert_eq!(exit_code_for(&err), 2);
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }
}
