//! Local transport: runs processes on this machine.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use pslaunch_core::{ProcessSpec, ProcessTarget};

use crate::error::{KillError, LaunchError, LaunchErrorKind, LaunchResult, ProcessError};
use crate::launcher::{ExitStatus, Launcher, RemoteProcess};

/// Spawns processes directly with `tokio::process`.
#[derive(Debug, Clone)]
pub struct LocalLauncher {
    inherit_stdio: bool,
}

impl Default for LocalLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLauncher {
    /// Launcher whose children share this process's stdout and stderr.
    pub fn new() -> Self {
        Self {
            inherit_stdio: true,
        }
    }

    /// Launcher whose children write to `/dev/null`.
    pub fn quiet() -> Self {
        Self {
            inherit_stdio: false,
        }
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn launch(&self, spec: &ProcessSpec) -> LaunchResult<Box<dyn RemoteProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        if self.inherit_stdio {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = cmd.spawn().map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    LaunchErrorKind::MissingExecutable
                }
                _ => LaunchErrorKind::Spawn,
            };
            LaunchError::new(&spec.target, kind, format!("{}: {e}", spec.program))
        })?;

        info!(process = %spec.target, pid = child.id(), "process started locally");
        Ok(Box::new(LocalProcess {
            target: spec.target.clone(),
            child,
        }))
    }

    async fn kill_all(&self, host: &str, program: &str) -> Result<bool, KillError> {
        let output = Command::new("pkill")
            .arg("-f")
            .arg(program)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| KillError {
                host: host.to_string(),
                program: program.to_string(),
                message: e.to_string(),
            })?;
        pkill_outcome(host, program, output.status.code(), &output.stderr)
    }
}

/// Interpret `pkill` exit codes: 0 killed something, 1 matched nothing.
pub(crate) fn pkill_outcome(
    host: &str,
    program: &str,
    code: Option<i32>,
    stderr: &[u8],
) -> Result<bool, KillError> {
    match code {
        Some(0) => {
            info!(%host, %program, "processes killed");
            Ok(true)
        }
        Some(1) => {
            debug!(%host, %program, "no matching processes");
            Ok(false)
        }
        other => Err(KillError {
            host: host.to_string(),
            program: program.to_string(),
            message: format!(
                "exit {:?}: {}",
                other,
                String::from_utf8_lossy(stderr).trim()
            ),
        }),
    }
}

/// A child process of this launcher.
pub struct LocalProcess {
    target: ProcessTarget,
    child: Child,
}

#[async_trait]
impl RemoteProcess for LocalProcess {
    fn target(&self) -> &ProcessTarget {
        &self.target
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait().await.map_err(ProcessError::Wait)?;
        Ok(status.into())
    }

    async fn terminate(&mut self) -> Result<(), ProcessError> {
        self.child.start_kill().map_err(|e| {
            warn!(process = %self.target, error = %e, "failed to kill local process");
            ProcessError::Terminate(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pslaunch_core::{EnvVars, Role};

    fn spec(program: &str, args: &[&str]) -> ProcessSpec {
        ProcessSpec {
            target: ProcessTarget {
                host: "localhost".to_string(),
                role: Role::Worker,
                rank: 0,
            },
            host_index: 0,
            local_index: 0,
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: EnvVars::new(),
            workdir: None,
        }
    }

    #[tokio::test]
    async fn reports_exit_codes() {
        let launcher = LocalLauncher::quiet();

        let mut ok = launcher.launch(&spec("sh", &["-c", "exit 0"])).await.unwrap();
        assert!(ok.wait().await.unwrap().success());

        let mut failed = launcher.launch(&spec("sh", &["-c", "exit 3"])).await.unwrap();
        assert_eq!(failed.wait().await.unwrap(), ExitStatus::from_code(3));
    }

    #[tokio::test]
    async fn missing_program_is_attributed_launch_error() {
        let launcher = LocalLauncher::quiet();
        let err = match launcher.launch(&spec("/nonexistent/LinearClassifier", &[])).await {
            Err(e) => e,
            Ok(_) => panic!("launch of a missing program succeeded"),
        };
        assert_eq!(err.kind, LaunchErrorKind::MissingExecutable);
        assert_eq!(err.target.host, "localhost");
        assert_eq!(err.target.role, Role::Worker);
    }

    #[tokio::test]
    async fn environment_is_forwarded() {
        let launcher = LocalLauncher::quiet();
        let mut s = spec("sh", &["-c", "test \"$GLOG_v\" = 2"]);
        s.env = EnvVars::parse("GLOG_v=2").unwrap();
        let mut process = launcher.launch(&s).await.unwrap();
        assert!(process.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn terminate_stops_a_running_process() {
        let launcher = LocalLauncher::quiet();
        let mut process = launcher.launch(&spec("sleep", &["30"])).await.unwrap();
        process.terminate().await.unwrap();
        let status = process.wait().await.unwrap();
        assert!(!status.success());
        assert_eq!(status.code, None);
    }

    #[test]
    fn pkill_exit_codes() {
        assert!(pkill_outcome("h", "p", Some(0), b"").unwrap());
        assert!(!pkill_outcome("h", "p", Some(1), b"").unwrap());
        assert!(pkill_outcome("h", "p", Some(2), b"syntax").is_err());
    }
}
