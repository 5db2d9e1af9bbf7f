//! pslaunch-core — the side-effect-free half of a job launch.
//!
//! Turns a job file and a hostfile into a list of fully rendered
//! [`ProcessSpec`]s:
//!
//! ```text
//! job.toml ──► JobConfig ──► ParameterSet (params ◄ dataset ◄ report ◄ --set)
//! hostfile ──► HostList  ──► RolePlan (W workers + S servers per host)
//!                                 │
//!                                 ▼
//!                          CommandBuilder ──► Vec<ProcessSpec>
//! ```
//!
//! All validation happens here, before any process is started.

pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod hostfile;
pub mod job;
pub mod nodes;
pub mod params;
pub mod plan;
pub mod types;

pub use command::{CommandBuilder, ProcessSpec};
pub use config::{JobConfig, LaunchConfig, SshConfig, Transport};
pub use env::EnvVars;
pub use error::{ConfigError, ConfigResult};
pub use hostfile::HostList;
pub use job::{LaunchMode, ResolveOptions, ResolvedJob};
pub use nodes::NodeTable;
pub use params::{ParamValue, ParameterSet};
pub use plan::{RolePlan, Slot};
pub use types::{ProcessTarget, Role};
