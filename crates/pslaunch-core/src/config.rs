//! Job file (`job.toml`) parser.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::env::EnvVars;
use crate::error::{ConfigError, ConfigResult};
use crate::types::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job: JobSection,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub params: toml::Table,
    #[serde(default)]
    pub datasets: BTreeMap<String, toml::Table>,
    #[serde(default)]
    pub env: RoleEnvConfig,
    pub report: Option<ReportConfig>,
    /// Directory relative paths in the file are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSection {
    pub name: String,
    /// Training binary, as seen from the target hosts.
    pub program: String,
    pub hostfile: PathBuf,
    /// Opaque `KEY=value KEY2=value2` string forwarded to every process.
    pub env: Option<String>,
    /// Working directory on the target hosts.
    pub workdir: Option<PathBuf>,
    /// Default entry of `[datasets]` merged into the parameters.
    pub dataset: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "one")]
    pub num_workers_per_node: i64,
    #[serde(default = "one")]
    pub num_servers_per_node: i64,
    #[serde(default)]
    pub allow_duplicate_hosts: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_workers_per_node: 1,
            num_servers_per_node: 1,
            allow_duplicate_hosts: false,
        }
    }
}

/// How processes reach their hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Loopback hosts run locally, everything else over SSH.
    #[default]
    Auto,
    Ssh,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(default)]
    pub transport: Transport,
    /// Maximum launches in flight at once.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    /// Cancel every sibling on the first failure.
    #[serde(default)]
    pub fail_fast: bool,
    /// Reject parameters that are not in the schema.
    #[serde(default)]
    pub strict_params: bool,
    pub timeout_secs: Option<u64>,
    /// Probe each host for the program before launching it.
    #[serde(default = "yes")]
    pub preflight: bool,
    #[serde(default)]
    pub ssh: SshConfig,
    pub node_config: Option<NodeConfigSection>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Auto,
            fan_out: default_fan_out(),
            fail_fast: false,
            strict_params: false,
            timeout_secs: None,
            preflight: true,
            ssh: SshConfig::default(),
            node_config: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_program")]
    pub program: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Extra `-o` options, e.g. `StrictHostKeyChecking=no`.
    #[serde(default)]
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: default_ssh_program(),
            user: None,
            port: None,
            connect_timeout_secs: default_connect_timeout(),
            options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigSection {
    pub path: PathBuf,
    pub base_port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleEnvConfig {
    pub worker: Option<HashMap<String, String>>,
    pub server: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Loss-report binary that replaces `job.program` in report mode.
    pub program: String,
    #[serde(default)]
    pub params: toml::Table,
}

fn one() -> i64 {
    1
}

fn yes() -> bool {
    true
}

fn default_fan_out() -> usize {
    16
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl JobConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: JobConfig = toml::from_str(&content)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: JobConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.job.program.trim().is_empty() {
            return Err(ConfigError::Invalid("job.program must not be empty".into()));
        }
        if self.launch.fan_out == 0 {
            return Err(ConfigError::Invalid("launch.fan_out must be at least 1".into()));
        }
        if let Some(dataset) = &self.job.dataset {
            if !self.datasets.contains_key(dataset) {
                return Err(ConfigError::UnknownDataset(dataset.clone()));
            }
        }
        Ok(())
    }

    /// Hostfile path, resolved against the job file's directory.
    pub fn hostfile_path(&self) -> PathBuf {
        if self.job.hostfile.is_absolute() {
            self.job.hostfile.clone()
        } else {
            self.base_dir.join(&self.job.hostfile)
        }
    }

    /// Environment forwarded to every process.
    pub fn global_env(&self) -> ConfigResult<EnvVars> {
        match &self.job.env {
            Some(raw) => EnvVars::parse(raw),
            None => Ok(EnvVars::new()),
        }
    }

    /// Per-role environment overrides (`[env.worker]`, `[env.server]`).
    pub fn role_env(&self, role: Role) -> ConfigResult<Option<EnvVars>> {
        let map = match role {
            Role::Worker => self.env.worker.as_ref(),
            Role::Server => self.env.server.as_ref(),
        };
        map.map(EnvVars::from_map).transpose()
    }

    /// Scaffold a minimal job file.
    pub fn scaffold(name: &str, program: &str, hostfile: &str) -> Self {
        let mut params = toml::Table::new();
        params.insert("optimizer".into(), toml::Value::String("sgd".into()));
        params.insert("alpha".into(), toml::Value::Float(0.1));

        let mut dataset = toml::Table::new();
        dataset.insert(
            "input".into(),
            toml::Value::String("hdfs:///datasets/classification/a9".into()),
        );
        dataset.insert("cardinality".into(), toml::Value::Integer(32561));
        dataset.insert("num_dims".into(), toml::Value::Integer(123));

        JobConfig {
            job: JobSection {
                name: name.to_string(),
                program: program.to_string(),
                hostfile: PathBuf::from(hostfile),
                env: Some("GLOG_logtostderr=true GLOG_v=-1 GLOG_minloglevel=0".to_string()),
                workdir: None,
                dataset: Some("a9".to_string()),
            },
            cluster: ClusterConfig::default(),
            launch: LaunchConfig::default(),
            params,
            datasets: BTreeMap::from([("a9".to_string(), dataset)]),
            env: RoleEnvConfig::default(),
            report: None,
            base_dir: PathBuf::new(),
        }
    }
}
