//! SSH transport.
//!
//! Every process is one `ssh` client running a small remote script:
//!
//! ```text
//! [cd '<workdir>' && ] echo $$ > '<pidfile>' && exec env 'K=V' ... '<program>' '<arg>' ...
//! ```
//!
//! The shell writes its own pid and then `exec`s the program, so the pidfile
//! names the program itself. Termination signals that pid over a second
//! connection. The client's exit status is the remote program's exit status,
//! except 255 which ssh reserves for its own failures.
//!
//! Pidfiles carry a per-launcher run id, so a pidfile left behind by an
//! earlier run of the same job is never mistaken for the current one.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pslaunch_core::SshConfig;
use pslaunch_core::{ProcessSpec, ProcessTarget};

use crate::error::{KillError, LaunchError, LaunchErrorKind, LaunchResult, ProcessError};
use crate::launcher::{ExitStatus, Launcher, RemoteProcess};
use crate::local::pkill_outcome;

/// Exit status ssh uses for connection and authentication failures.
const SSH_FAILURE: i32 = 255;

/// Extra time on top of `ConnectTimeout` before a remote command is abandoned.
const ANSWER_GRACE: Duration = Duration::from_secs(5);

/// How long the terminate script waits for the remote shell to record its pid.
const PIDFILE_WAIT: Duration = Duration::from_secs(2);

/// Exit status of the terminate script when no pid was ever recorded.
const NO_PID_RECORDED: i32 = 3;

/// How long `wait` drains ssh's stderr after a connection failure.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

static NEXT_RUN: AtomicU64 = AtomicU64::new(0);

fn new_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!(
        "{}.{secs}.{}",
        std::process::id(),
        NEXT_RUN.fetch_add(1, Ordering::Relaxed)
    )
}

/// Launches processes through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshLauncher {
    config: SshConfig,
    job_id: String,
    run_id: String,
    preflight: bool,
    inherit_stdio: bool,
}

impl SshLauncher {
    /// `job_id` namespaces the remote pidfiles; it is sanitized to
    /// `[A-Za-z0-9_.]`.
    pub fn new(config: SshConfig, job_id: &str) -> Self {
        let job_id = job_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self {
            config,
            job_id,
            run_id: new_run_id(),
            preflight: true,
            inherit_stdio: true,
        }
    }

    /// Probe each host for the program before launching on it.
    pub fn with_preflight(mut self, enabled: bool) -> Self {
        self.preflight = enabled;
        self
    }

    /// Discard remote stdout and stderr.
    pub fn quiet(mut self) -> Self {
        self.inherit_stdio = false;
        self
    }

    /// Remote pidfile for one process.
    pub fn pidfile(&self, target: &ProcessTarget) -> String {
        format!(
            "/tmp/pslaunch-{}-{}-{}-{}.pid",
            self.job_id, self.run_id, target.role, target.rank
        )
    }

    /// Time allowed for one remote command to answer.
    fn answer_limit(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs) + ANSWER_GRACE
    }

    /// Full argument list for `ssh`, excluding the program itself.
    pub fn ssh_args(&self, host: &str, remote_command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
        ];
        if let Some(port) = self.config.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(match &self.config.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        });
        args.push(remote_command.to_string());
        args
    }

    fn command(&self, host: &str, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.ssh_args(host, remote_command))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn check_program(&self, spec: &ProcessSpec) -> LaunchResult<()> {
        let probe = with_workdir(
            spec,
            format!(
                "test -x {p} || command -v {p} >/dev/null 2>&1",
                p = shell_quote(&spec.program)
            ),
        );
        let mut cmd = self.command(spec.host(), &probe);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());

        let limit = self.answer_limit();
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(LaunchError::new(
                    &spec.target,
                    LaunchErrorKind::Spawn,
                    format!("{}: {e}", self.config.program),
                ));
            }
            Err(_) => {
                return Err(LaunchError::new(
                    &spec.target,
                    LaunchErrorKind::Unreachable,
                    format!("no answer within {}s", limit.as_secs()),
                ));
            }
        };
        debug!(process = %spec.target, code = ?output.status.code(), "preflight finished");
        classify_preflight(spec, output.status.code(), &output.stderr)
    }
}

#[async_trait]
impl Launcher for SshLauncher {
    async fn launch(&self, spec: &ProcessSpec) -> LaunchResult<Box<dyn RemoteProcess>> {
        if self.preflight {
            self.check_program(spec).await?;
        }

        let pidfile = self.pidfile(&spec.target);
        let script = render_script(spec, &pidfile);
        let mut cmd = self.command(spec.host(), &script);
        if self.inherit_stdio {
            cmd.stdout(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null());
        }
        // Relayed so ssh's own error message survives a connection failure.
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            LaunchError::new(
                &spec.target,
                LaunchErrorKind::Spawn,
                format!("{}: {e}", self.config.program),
            )
        })?;

        let stderr_tail = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(relay_stderr(pipe, self.inherit_stdio)));

        info!(process = %spec.target, %pidfile, "process dispatched over ssh");
        Ok(Box::new(SshProcess {
            target: spec.target.clone(),
            launcher: self.clone(),
            pidfile,
            child,
            stderr_tail,
        }))
    }

    async fn kill_all(&self, host: &str, program: &str) -> Result<bool, KillError> {
        let remote = format!("exec pkill -f {}", shell_quote(program));
        let output = self
            .command(host, &remote)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| KillError {
                host: host.to_string(),
                program: program.to_string(),
                message: e.to_string(),
            })?;

        if output.status.code() == Some(SSH_FAILURE) {
            return Err(KillError {
                host: host.to_string(),
                program: program.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        pkill_outcome(host, program, output.status.code(), &output.stderr)
    }
}

/// A process started by [`SshLauncher`].
pub struct SshProcess {
    target: ProcessTarget,
    launcher: SshLauncher,
    pidfile: String,
    child: Child,
    /// Last line ssh wrote to stderr, available once the pipe closes.
    stderr_tail: Option<JoinHandle<String>>,
}

impl SshProcess {
    async fn ssh_stderr(&mut self) -> String {
        let Some(handle) = self.stderr_tail.as_mut() else {
            return String::new();
        };
        let tail = match tokio::time::timeout(STDERR_DRAIN, handle).await {
            Ok(Ok(tail)) => tail,
            _ => String::new(),
        };
        self.stderr_tail = None;
        tail
    }
}

#[async_trait]
impl RemoteProcess for SshProcess {
    fn target(&self) -> &ProcessTarget {
        &self.target
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status: ExitStatus = self.child.wait().await.map_err(ProcessError::Wait)?.into();
        if status.code != Some(SSH_FAILURE) {
            return Ok(status);
        }

        let stderr = self.ssh_stderr().await;
        if self.launcher.preflight {
            // The host answered the probe, so the connection dropped later.
            warn!(process = %self.target, %stderr, "ssh connection lost");
            return Err(ProcessError::Disconnected(stderr));
        }
        let error = LaunchError::new(&self.target, ssh_failure_kind(&stderr), stderr);
        warn!(process = %self.target, kind = %error.kind, "ssh could not start the process");
        Err(ProcessError::Launch(error))
    }

    async fn terminate(&mut self) -> Result<(), ProcessError> {
        let remote = terminate_script(&self.pidfile);
        let limit = self.launcher.answer_limit() + PIDFILE_WAIT;
        let output = match tokio::time::timeout(
            limit,
            self.launcher
                .command(&self.target.host, &remote)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        {
            Ok(output) => output.map_err(|e| ProcessError::Terminate(e.to_string()))?,
            Err(_) => {
                warn!(process = %self.target, "host did not answer the termination request");
                return Err(ProcessError::Terminate(format!(
                    "no answer within {}s",
                    limit.as_secs()
                )));
            }
        };

        match output.status.code() {
            Some(0) => debug!(process = %self.target, "remote process signalled"),
            Some(SSH_FAILURE) | None => {
                let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(process = %self.target, %message, "could not reach host to terminate");
                return Err(ProcessError::Terminate(message));
            }
            Some(NO_PID_RECORDED) => {
                warn!(process = %self.target, "remote shell never recorded a pid");
                return Err(ProcessError::Terminate(format!(
                    "no pid recorded in {} after {}s",
                    self.pidfile,
                    PIDFILE_WAIT.as_secs()
                )));
            }
            Some(code) => {
                debug!(process = %self.target, code, "remote process already gone");
            }
        }

        // The remote side is handled; stop the client so `wait` returns.
        if let Err(e) = self.child.start_kill() {
            debug!(process = %self.target, error = %e, "ssh client already exited");
        }
        Ok(())
    }
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// The remote shell script that signals the pid recorded in `pidfile`.
///
/// Waits up to [`PIDFILE_WAIT`] for the launch script to record its pid and
/// exits with [`NO_PID_RECORDED`] if it never does.
pub fn terminate_script(pidfile: &str) -> String {
    let quoted = shell_quote(pidfile);
    let ticks = PIDFILE_WAIT.as_millis() / 100;
    format!(
        "i=0; while [ ! -s {quoted} ] && [ \"$i\" -lt {ticks} ]; do sleep 0.1; i=$((i+1)); done; \
         [ -s {quoted} ] || exit {NO_PID_RECORDED}; \
         kill -TERM \"$(cat {quoted})\" && rm -f {quoted}"
    )
}

/// The remote shell script that starts `spec` and records its pid.
pub fn render_script(spec: &ProcessSpec, pidfile: &str) -> String {
    let mut script = format!("echo $$ > {} && exec env", shell_quote(pidfile));
    for (key, value) in spec.env.iter() {
        script.push(' ');
        script.push_str(&shell_quote(&format!("{key}={value}")));
    }
    script.push(' ');
    script.push_str(&shell_quote(&spec.program));
    for arg in &spec.args {
        script.push(' ');
        script.push_str(&shell_quote(arg));
    }
    with_workdir(spec, script)
}

fn with_workdir(spec: &ProcessSpec, script: String) -> String {
    match &spec.workdir {
        Some(dir) => format!(
            "cd {} && {script}",
            shell_quote(&dir.to_string_lossy())
        ),
        None => script,
    }
}

/// Copy ssh's stderr through (when `forward` is set) and return its last
/// non-empty line.
async fn relay_stderr(pipe: ChildStderr, forward: bool) -> String {
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    let mut tail = String::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if forward {
                    let _ = tokio::io::stderr().write_all(&line).await;
                }
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if !text.is_empty() {
                    tail = text.to_string();
                }
            }
        }
    }
    tail
}

/// Which launch failure an ssh exit of 255 stands for.
fn ssh_failure_kind(stderr: &str) -> LaunchErrorKind {
    if stderr.contains("Permission denied") || stderr.contains("Host key verification failed") {
        LaunchErrorKind::AuthFailed
    } else {
        LaunchErrorKind::Unreachable
    }
}

/// Map a preflight probe's exit status to a launch outcome.
fn classify_preflight(spec: &ProcessSpec, code: Option<i32>, stderr: &[u8]) -> LaunchResult<()> {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    let kind = match code {
        Some(0) => return Ok(()),
        Some(SSH_FAILURE) => ssh_failure_kind(&stderr),
        None => LaunchErrorKind::Unreachable,
        Some(_) => {
            return Err(LaunchError::new(
                &spec.target,
                LaunchErrorKind::MissingExecutable,
                format!("{} not found on {}", spec.program, spec.host()),
            ));
        }
    };
    Err(LaunchError::new(&spec.target, kind, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pslaunch_core::{EnvVars, Role};

    fn spec() -> ProcessSpec {
        ProcessSpec {
            target: ProcessTarget {
                host: "proj5".to_string(),
                role: Role::Server,
                rank: 1,
            },
            host_index: 0,
            local_index: 2,
            program: "build/LinearClassifier".to_string(),
            args: vec!["--input=hdfs:///a9".to_string(), "--role=server".to_string()],
            env: EnvVars::parse("GLOG_v=-1 GLOG_logtostderr=true").unwrap(),
            workdir: None,
        }
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("--alpha=0.001"), "--alpha=0.001");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn script_records_pid_then_execs() {
        let script = render_script(&spec(), "/tmp/p.pid");
        assert_eq!(
            script,
            "echo $$ > /tmp/p.pid && exec env GLOG_v=-1 GLOG_logtostderr=true \
             build/LinearClassifier --input=hdfs:///a9 --role=server"
        );
    }

    #[test]
    fn script_changes_into_workdir() {
        let mut s = spec();
        s.workdir = Some("/home/tati/ps lite".into());
        let script = render_script(&s, "/tmp/p.pid");
        assert!(script.starts_with("cd '/home/tati/ps lite' && echo $$"));
    }

    #[test]
    fn ssh_arguments() {
        let config = SshConfig {
            user: Some("tati".into()),
            port: Some(2222),
            options: vec!["StrictHostKeyChecking=no".into()],
            ..SshConfig::default()
        };
        let launcher = SshLauncher::new(config, "lr");
        let args = launcher.ssh_args("proj5", "true");
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-p",
                "2222",
                "-o",
                "StrictHostKeyChecking=no",
                "tati@proj5",
                "true",
            ]
        );
    }

    #[test]
    fn pidfile_is_namespaced_by_sanitized_job_and_run() {
        let first = SshLauncher::new(SshConfig::default(), "lr a9/run");
        let second = SshLauncher::new(SshConfig::default(), "lr a9/run");
        let target = spec().target;

        let pidfile = first.pidfile(&target);
        assert!(pidfile.starts_with("/tmp/pslaunch-lr_a9_run-"));
        assert!(pidfile.ends_with("-server-1.pid"));
        assert_eq!(shell_quote(&pidfile), pidfile);
        assert_ne!(pidfile, second.pidfile(&target));
        assert_eq!(pidfile, first.clone().pidfile(&target));
    }

    #[test]
    fn terminate_script_waits_for_a_recorded_pid() {
        let script = terminate_script("/tmp/p.pid");
        assert!(script.starts_with("i=0; while [ ! -s /tmp/p.pid ] && [ \"$i\" -lt 20 ]"));
        assert!(script.contains("[ -s /tmp/p.pid ] || exit 3;"));
        assert!(script.ends_with("kill -TERM \"$(cat /tmp/p.pid)\" && rm -f /tmp/p.pid"));
    }

    #[test]
    fn preflight_classification() {
        let s = spec();
        assert!(classify_preflight(&s, Some(0), b"").is_ok());

        let auth = classify_preflight(&s, Some(255), b"tati@proj5: Permission denied (publickey).")
            .unwrap_err();
        assert_eq!(auth.kind, LaunchErrorKind::AuthFailed);

        let down = classify_preflight(
            &s,
            Some(255),
            b"ssh: connect to host proj5 port 22: Connection refused",
        )
        .unwrap_err();
        assert_eq!(down.kind, LaunchErrorKind::Unreachable);

        let killed = classify_preflight(&s, None, b"").unwrap_err();
        assert_eq!(killed.kind, LaunchErrorKind::Unreachable);

        let missing = classify_preflight(&s, Some(1), b"").unwrap_err();
        assert_eq!(missing.kind, LaunchErrorKind::MissingExecutable);
        assert_eq!(missing.target, s.target);
    }
}
