//! Per-host transport selection.

use async_trait::async_trait;
use tracing::debug;

use pslaunch_core::{LaunchConfig, ProcessSpec, Transport};

use crate::error::{KillError, LaunchResult};
use crate::launcher::{Launcher, RemoteProcess};
use crate::local::LocalLauncher;
use crate::ssh::SshLauncher;

/// Whether `host` names this machine without going through the network.
pub fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost") || host == "::1" || host.starts_with("127.")
}

/// Dispatches each process to the local or SSH transport.
#[derive(Debug, Clone)]
pub struct HostRouter {
    transport: Transport,
    local: LocalLauncher,
    ssh: SshLauncher,
}

impl HostRouter {
    pub fn new(transport: Transport, local: LocalLauncher, ssh: SshLauncher) -> Self {
        Self {
            transport,
            local,
            ssh,
        }
    }

    /// Build both transports from the `[launch]` section.
    pub fn from_config(config: &LaunchConfig, job_name: &str) -> Self {
        let ssh = SshLauncher::new(config.ssh.clone(), job_name).with_preflight(config.preflight);
        Self::new(config.transport, LocalLauncher::new(), ssh)
    }

    fn is_local(&self, host: &str) -> bool {
        match self.transport {
            Transport::Local => true,
            Transport::Ssh => false,
            Transport::Auto => is_loopback(host),
        }
    }

    fn pick(&self, host: &str) -> &dyn Launcher {
        if self.is_local(host) {
            &self.local
        } else {
            &self.ssh
        }
    }
}

#[async_trait]
impl Launcher for HostRouter {
    async fn launch(&self, spec: &ProcessSpec) -> LaunchResult<Box<dyn RemoteProcess>> {
        debug!(
            process = %spec.target,
            local = self.is_local(spec.host()),
            "routing launch"
        );
        self.pick(spec.host()).launch(spec).await
    }

    async fn kill_all(&self, host: &str, program: &str) -> Result<bool, KillError> {
        self.pick(host).kill_all(host, program).await
    }
}
