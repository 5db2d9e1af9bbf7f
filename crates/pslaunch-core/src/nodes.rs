//! Node table consumed by the training binary's `--config_file` flag.
//!
//! One `id:hostname:port` line per host, ids following hostfile order.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::hostfile::HostList;

/// Where to write the node table and which ports to hand out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTable {
    pub path: PathBuf,
    pub base_port: u16,
}

impl NodeTable {
    pub fn new(path: impl Into<PathBuf>, base_port: u16) -> Self {
        Self {
            path: path.into(),
            base_port,
        }
    }

    /// Render the table for `hosts`.
    pub fn render(&self, hosts: &HostList) -> ConfigResult<String> {
        let mut out = String::new();
        for (id, host) in hosts.iter().enumerate() {
            let port = u16::try_from(id)
                .ok()
                .and_then(|offset| self.base_port.checked_add(offset))
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "base port {} leaves no room for {} hosts",
                        self.base_port,
                        hosts.len()
                    ))
                })?;
            out.push_str(&format!("{id}:{host}:{port}\n"));
        }
        Ok(out)
    }

    /// Write the table to `self.path`, creating parent directories.
    ///
    /// The path must be visible to every host (a shared filesystem).
    pub fn write(&self, hosts: &HostList) -> ConfigResult<()> {
        let content = self.render(hosts)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| write_err(parent, source))?;
        }
        std::fs::write(&self.path, content).map_err(|source| write_err(&self.path, source))?;
        info!(path = %self.path.display(), nodes = hosts.len(), "node table written");
        Ok(())
    }
}

fn write_err(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Write {
        path: path.to_path_buf(),
        source,
    }
}
