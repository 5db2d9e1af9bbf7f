//! End-to-end runs of the `pslaunch` binary on loopback hosts.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn pslaunch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pslaunch"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run pslaunch")
}

/// Lay out a job directory with a trainer script and a two-line hostfile.
fn job_dir(trainer: &str, extra: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let trainer_path = dir.path().join("trainer.sh");
    std::fs::write(&trainer_path, format!("#!/bin/sh\n{trainer}\n")).unwrap();
    std::fs::set_permissions(&trainer_path, std::fs::Permissions::from_mode(0o755)).unwrap();
    std::fs::write(dir.path().join("hosts"), "localhost\n127.0.0.1\n").unwrap();

    let job = dir.path().join("job.toml");
    std::fs::write(
        &job,
        format!(
            r#"
[job]
name = "cli-test"
program = "{program}"
hostfile = "hosts"
env = "GLOG_v=-1"
dataset = "a9"

[cluster]
num_workers_per_node = 2
num_servers_per_node = 1

[launch]
transport = "local"

[params]
alpha = 0.00001

[datasets.a9]
input = "/tmp/a9"
cardinality = 32561
num_dims = 123
{extra}
"#,
            program = trainer_path.display()
        ),
    )
    .unwrap();
    (dir, job)
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn successful_job_exits_zero() {
    let (_dir, job) = job_dir("exit 0", "");
    let out = pslaunch(&["run", "--job", path_arg(&job)]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(out.status.code(), Some(0), "stdout: {stdout}");
    assert!(stdout.contains("job succeeded: 6 succeeded, 0 failed, 0 cancelled"));
}

#[test]
fn failing_process_exits_one_with_json_report() {
    let (_dir, job) = job_dir(
        r#"case "$PSLAUNCH_ROLE:$PSLAUNCH_RANK" in server:1) exit 3 ;; esac"#,
        "",
    );
    let out = pslaunch(&["run", "--job", path_arg(&job), "--format", "json"]);
    assert_eq!(out.status.code(), Some(1));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["success"], false);
    let failed: Vec<_> = report["processes"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["state"].get("failed").is_some())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["target"]["role"], "server");
    assert_eq!(failed[0]["target"]["rank"], 1);
    assert_eq!(failed[0]["target"]["host"], "127.0.0.1");
}

#[test]
fn missing_required_parameter_exits_two_before_launch() {
    let (dir, job) = job_dir(r#"touch "$(dirname "$0")/launched""#, "");
    let broken = std::fs::read_to_string(&job)
        .unwrap()
        .replace("num_dims = 123\n", "");
    std::fs::write(&job, broken).unwrap();

    let out = pslaunch(&["run", "--job", path_arg(&job)]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("num_dims"));
    assert!(!dir.path().join("launched").exists());
}

#[test]
fn deadline_exits_124() {
    let (_dir, job) = job_dir("exec sleep 30", "");
    let out = pslaunch(&["run", "--job", path_arg(&job), "--timeout", "1"]);
    assert_eq!(out.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("stopping local processes"), "stderr: {stderr}");
    assert!(!stderr.contains("remaining processes left running"));
}

#[test]
fn dry_run_prints_commands_without_launching() {
    let (dir, job) = job_dir(r#"touch "$(dirname "$0")/launched""#, "");
    let out = pslaunch(&[
        "run",
        "--job",
        path_arg(&job),
        "--dry-run",
        "--set",
        "alpha=0.001",
    ]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("--alpha=0.001"));
    assert!(stdout.contains("--hosts=localhost,127.0.0.1"));
    assert!(!dir.path().join("launched").exists());
}

#[test]
fn node_table_is_written_before_launch() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = dir.path().join("cfg/nodes.cfg");
    let (_job_dir, job) = job_dir(
        r#"test -f "$(echo "$@" | sed 's/.*--config_file=\([^ ]*\).*/\1/')""#,
        &format!(
            "\n[launch.node_config]\npath = \"{}\"\nbase_port = 37542\n",
            nodes.display()
        ),
    );

    let out = pslaunch(&["run", "--job", path_arg(&job)]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(
        std::fs::read_to_string(&nodes).unwrap(),
        "0:localhost:37542\n1:127.0.0.1:37543\n"
    );
}

#[test]
fn plan_outputs_json() {
    let (_dir, job) = job_dir("exit 0", "");
    let out = pslaunch(&["plan", "--job", path_arg(&job), "--format", "json"]);
    assert_eq!(out.status.code(), Some(0));
    let plan: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(plan["processes"].as_array().unwrap().len(), 6);
    assert_eq!(plan["hosts"][0]["servers"], serde_json::json!([0]));
}
