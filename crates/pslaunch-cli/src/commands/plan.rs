use std::fmt::Write as _;

use anyhow::Context;
use serde::Serialize;

use pslaunch_core::{LaunchMode, ResolvedJob};

use crate::{JobArgs, OutputFormat};

use super::{EXIT_SUCCESS, mode};

#[derive(Serialize)]
struct PlanView<'a> {
    name: &'a str,
    mode: &'static str,
    program: &'a str,
    hosts: Vec<HostView<'a>>,
    processes: Vec<ProcessView<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_table: Option<String>,
}

#[derive(Serialize)]
struct HostView<'a> {
    host: &'a str,
    workers: Vec<u32>,
    servers: Vec<u32>,
}

#[derive(Serialize)]
struct ProcessView<'a> {
    host: &'a str,
    role: &'static str,
    rank: u32,
    env: Vec<String>,
    args: &'a [String],
}

pub fn plan(args: &JobArgs, report: bool, format: OutputFormat) -> anyhow::Result<u8> {
    let (_, job) = super::resolve(args, mode(report))?;
    print_plan(&job, format)?;
    Ok(EXIT_SUCCESS)
}

pub fn print_plan(job: &ResolvedJob, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", render_text(job)),
        OutputFormat::Json => println!("{}", render_json(job)?),
    }
    Ok(())
}

fn mode_name(mode: LaunchMode) -> &'static str {
    match mode {
        LaunchMode::Train => "train",
        LaunchMode::Report => "report",
    }
}

pub fn render_json(job: &ResolvedJob) -> anyhow::Result<String> {
    let hosts = job
        .hosts
        .iter()
        .enumerate()
        .map(|(i, host)| HostView {
            host,
            workers: job.plan.workers_on(i),
            servers: job.plan.servers_on(i),
        })
        .collect();
    let processes = job
        .specs
        .iter()
        .map(|spec| ProcessView {
            host: spec.host(),
            role: spec.target.role.as_str(),
            rank: spec.target.rank,
            env: spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            args: &spec.args,
        })
        .collect();
    let node_table = match &job.node_table {
        Some(table) => Some(table.render(&job.hosts)?),
        None => None,
    };

    let view = PlanView {
        name: &job.name,
        mode: mode_name(job.mode),
        program: &job.program,
        hosts,
        processes,
        node_table,
    };
    serde_json::to_string_pretty(&view).context("failed to encode plan")
}

pub fn render_text(job: &ResolvedJob) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "job {} ({}): {} host(s), {} worker(s), {} server(s)",
        job.name,
        mode_name(job.mode),
        job.hosts.len(),
        job.plan.total_workers(),
        job.plan.total_servers()
    );

    let width = job.hosts.iter().map(str::len).max().unwrap_or(0);
    for (i, host) in job.hosts.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {host:<width$}  workers {:?}  servers {:?}",
            job.plan.workers_on(i),
            job.plan.servers_on(i)
        );
    }
    if let Some(table) = &job.node_table {
        let _ = writeln!(out, "  node table: {}", table.path.display());
    }

    for spec in &job.specs {
        let _ = writeln!(out, "\n{}\n  {spec}", spec.target);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pslaunch_core::{HostList, JobConfig, ResolveOptions};

    fn job() -> ResolvedJob {
        JobConfig::from_toml_str(
            r#"
[job]
name = "lr"
program = "build/LinearClassifier"
hostfile = "unused"
env = "GLOG_v=-1"

[cluster]
num_workers_per_node = 2
num_servers_per_node = 1

[params]
input = "hdfs:///a9"
cardinality = 32561
num_dims = 123
"#,
        )
        .unwrap()
        .resolve_with_hosts(
            HostList::parse("proj5\nproj6\n").unwrap(),
            &ResolveOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn text_plan_shows_rank_layout_and_commands() {
        let text = render_text(&job());
        assert!(text.starts_with("job lr (train): 2 host(s), 4 worker(s), 2 server(s)\n"));
        assert!(text.contains("  proj5  workers [0, 1]  servers [0]\n"));
        assert!(text.contains("  proj6  workers [2, 3]  servers [1]\n"));
        assert!(text.contains("\nserver#1@proj6\n  GLOG_v=-1 "));
    }

    #[test]
    fn json_plan_lists_every_process() {
        let value: serde_json::Value = serde_json::from_str(&render_json(&job()).unwrap()).unwrap();
        assert_eq!(value["processes"].as_array().unwrap().len(), 6);
        assert_eq!(value["processes"][2]["role"], "server");
        assert_eq!(value["hosts"][1]["workers"], serde_json::json!([2, 3]));
        assert!(value.get("node_table").is_none());
    }
}
