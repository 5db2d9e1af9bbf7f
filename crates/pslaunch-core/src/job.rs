//! Resolves a [`JobConfig`] into launch-ready process specs.
//!
//! This is the pure half of a launch: it reads the hostfile, merges the
//! parameter layers, plans roles, and renders every command line. Nothing
//! here touches a remote host, so any error it returns leaves the cluster
//! untouched.

use tracing::info;

use crate::command::{CommandBuilder, ProcessSpec};
use crate::config::JobConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::hostfile::HostList;
use crate::nodes::NodeTable;
use crate::params::{ParamValue, ParameterSet};
use crate::plan::RolePlan;
use crate::types::Role;

/// Which binary the job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    #[default]
    Train,
    /// Loss evaluation over dumped models.
    Report,
}

/// Caller-side choices layered over the job file.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub mode: LaunchMode,
    /// Overrides `job.dataset`.
    pub dataset: Option<String>,
    /// `--set key=value` overrides; applied last.
    pub overrides: ParameterSet,
}

/// Everything needed to launch one job.
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub name: String,
    pub mode: LaunchMode,
    pub program: String,
    pub hosts: HostList,
    pub params: ParameterSet,
    pub plan: RolePlan,
    pub specs: Vec<ProcessSpec>,
    pub node_table: Option<NodeTable>,
}

impl JobConfig {
    /// Merge parameter layers in order: cluster slot counts, `[params]`,
    /// the selected dataset, `[report.params]` in report mode, then
    /// caller overrides.
    pub fn parameters(&self, opts: &ResolveOptions) -> ConfigResult<ParameterSet> {
        let mut params = ParameterSet::new();
        params.insert("num_workers_per_node", self.cluster.num_workers_per_node);
        params.insert("num_servers_per_node", self.cluster.num_servers_per_node);
        params.merge(&ParameterSet::from_toml_table(&self.params)?);

        if let Some(name) = opts.dataset.as_ref().or(self.job.dataset.as_ref()) {
            let dataset = self
                .datasets
                .get(name)
                .ok_or_else(|| ConfigError::UnknownDataset(name.clone()))?;
            params.merge(&ParameterSet::from_toml_table(dataset)?);
        }

        if opts.mode == LaunchMode::Report {
            params.merge(&ParameterSet::from_toml_table(&self.report_config()?.params)?);
        }

        params.merge(&opts.overrides);
        params.check_schema(self.launch.strict_params)?;
        Ok(params)
    }

    pub fn program(&self, mode: LaunchMode) -> ConfigResult<&str> {
        match mode {
            LaunchMode::Train => Ok(&self.job.program),
            LaunchMode::Report => Ok(&self.report_config()?.program),
        }
    }

    fn report_config(&self) -> ConfigResult<&crate::config::ReportConfig> {
        self.report
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("report mode requires a [report] section".into()))
    }

    /// Read the hostfile, plan roles, and render every process spec.
    pub fn resolve(&self, opts: &ResolveOptions) -> ConfigResult<ResolvedJob> {
        let hosts =
            HostList::from_file_with(&self.hostfile_path(), self.cluster.allow_duplicate_hosts)?;
        self.resolve_with_hosts(hosts, opts)
    }

    /// Like [`resolve`](Self::resolve) but with an in-memory host list.
    pub fn resolve_with_hosts(
        &self,
        hosts: HostList,
        opts: &ResolveOptions,
    ) -> ConfigResult<ResolvedJob> {
        let params = self.parameters(opts)?;
        let program = self.program(opts.mode)?.to_string();

        let workers = slot_param(&params, "num_workers_per_node")?;
        let servers = slot_param(&params, "num_servers_per_node")?;
        let plan = RolePlan::new(&hosts, workers, servers)?;

        let node_table = self
            .launch
            .node_config
            .as_ref()
            .map(|nc| NodeTable::new(nc.path.clone(), nc.base_port));

        let mut builder =
            CommandBuilder::new(program.clone(), &params, &plan)?.with_env(self.global_env()?);
        for role in [Role::Worker, Role::Server] {
            if let Some(env) = self.role_env(role)? {
                builder = builder.with_role_env(role, env);
            }
        }
        if let Some(table) = &node_table {
            // Render now so a bad base port fails before launch.
            table.render(&hosts)?;
            builder = builder.with_node_config(table.path.clone());
        }
        if let Some(workdir) = &self.job.workdir {
            builder = builder.with_workdir(workdir.clone());
        }
        let specs = builder.build_all();

        info!(
            job = %self.job.name,
            hosts = hosts.len(),
            workers = plan.total_workers(),
            servers = plan.total_servers(),
            "job resolved"
        );

        Ok(ResolvedJob {
            name: self.job.name.clone(),
            mode: opts.mode,
            program,
            hosts,
            params,
            plan,
            specs,
            node_table,
        })
    }
}

fn slot_param(params: &ParameterSet, key: &str) -> ConfigResult<i64> {
    match params.get_or_default(key) {
        Some(ParamValue::Int(n)) => Ok(n),
        Some(other) => Err(ConfigError::ParamType {
            key: key.to_string(),
            expected: "integer",
            found: other.kind_name(),
        }),
        None => Err(ConfigError::MissingParam(key.to_string())),
    }
}
