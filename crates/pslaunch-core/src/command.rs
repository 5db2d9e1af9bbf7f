//! Command builder: renders one process invocation per planned slot.
//!
//! Every parameter becomes a `--key=value` flag. The builder then appends
//! the flags the launcher owns:
//!
//! | flag            | value                                   |
//! |-----------------|-----------------------------------------|
//! | `--role`        | `worker` or `server`                    |
//! | `--rank`        | dense rank within the role              |
//! | `--num_workers` | total worker processes in the job       |
//! | `--num_servers` | total server processes in the job       |
//! | `--hosts`       | comma-joined hostfile, in file order    |
//! | `--my_id`       | host index (only with a node table)     |
//! | `--config_file` | node table path (only with a node table)|

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::env::EnvVars;
use crate::error::ConfigResult;
use crate::params::ParameterSet;
use crate::plan::{RolePlan, Slot};
use crate::types::{ProcessTarget, Role};

/// Environment variable carrying the process role.
pub const ROLE_ENV: &str = "PSLAUNCH_ROLE";
/// Environment variable carrying the process rank.
pub const RANK_ENV: &str = "PSLAUNCH_RANK";

/// One fully rendered unit of launch work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub target: ProcessTarget,
    /// Index of the target host in the hostfile.
    pub host_index: usize,
    /// Position among this host's slots of the same role.
    pub local_index: u32,
    pub program: String,
    pub args: Vec<String>,
    pub env: EnvVars,
    /// Working directory on the target host.
    pub workdir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn host(&self) -> &str {
        &self.target.host
    }
}

/// Human-readable `K=V program args...` rendering, used for dry runs.
impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.env.iter() {
            write!(f, "{key}={value} ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Renders [`ProcessSpec`]s from a parameter set and a role plan.
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    program: String,
    params: &'a ParameterSet,
    plan: &'a RolePlan,
    env: EnvVars,
    role_env: HashMap<Role, EnvVars>,
    node_config: Option<PathBuf>,
    workdir: Option<PathBuf>,
}

impl<'a> CommandBuilder<'a> {
    /// Create a builder. Fails when a required parameter is missing, a
    /// reserved flag is set by hand, or a float is not finite.
    pub fn new(
        program: impl Into<String>,
        params: &'a ParameterSet,
        plan: &'a RolePlan,
    ) -> ConfigResult<Self> {
        params.check_renderable()?;
        Ok(Self {
            program: program.into(),
            params,
            plan,
            env: EnvVars::new(),
            role_env: HashMap::new(),
            node_config: None,
            workdir: None,
        })
    }

    /// Environment forwarded to every process.
    pub fn with_env(mut self, env: EnvVars) -> Self {
        self.env = env;
        self
    }

    /// Extra environment for one role; wins over the global environment.
    pub fn with_role_env(mut self, role: Role, env: EnvVars) -> Self {
        self.role_env.insert(role, env);
        self
    }

    /// Pass `--my_id` and `--config_file` pointing at a node table.
    pub fn with_node_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.node_config = Some(path.into());
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Render the argument list (without the program) for one slot.
    pub fn render_args(&self, slot: &Slot) -> Vec<String> {
        let mut args: Vec<String> = self
            .params
            .iter()
            .map(|(key, value)| format!("--{key}={value}"))
            .collect();

        args.push(format!("--role={}", slot.role));
        args.push(format!("--rank={}", slot.rank));
        args.push(format!("--num_workers={}", self.plan.total_workers()));
        args.push(format!("--num_servers={}", self.plan.total_servers()));
        args.push(format!("--hosts={}", self.plan.hosts().joined()));

        if let Some(path) = &self.node_config {
            args.push(format!("--my_id={}", slot.host_index));
            args.push(format!("--config_file={}", path.display()));
        }

        args
    }

    /// Merged environment for one slot: global, then role overrides, then
    /// the injected role and rank.
    pub fn render_env(&self, slot: &Slot) -> EnvVars {
        let env = match self.role_env.get(&slot.role) {
            Some(overrides) => self.env.merged(overrides),
            None => self.env.clone(),
        };
        env.merged(&EnvVars::injected(&[
            (ROLE_ENV, slot.role.as_str().to_string()),
            (RANK_ENV, slot.rank.to_string()),
        ]))
    }

    pub fn build(&self, slot: &Slot) -> ProcessSpec {
        ProcessSpec {
            target: self.plan.target(slot),
            host_index: slot.host_index,
            local_index: slot.local_index,
            program: self.program.clone(),
            args: self.render_args(slot),
            env: self.render_env(slot),
            workdir: self.workdir.clone(),
        }
    }

    /// One spec per slot, in plan order.
    pub fn build_all(&self) -> Vec<ProcessSpec> {
        self.plan.slots().iter().map(|slot| self.build(slot)).collect()
    }
}
