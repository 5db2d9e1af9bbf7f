//! Hostfile parsing.
//!
//! A hostfile is plain text with one host identifier per line. Blank
//! lines and lines whose first non-whitespace character is `#` are
//! skipped. Host order is significant: it drives rank assignment.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Ordered, non-empty list of cluster machines for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostList {
    hosts: Vec<String>,
}

impl HostList {
    /// Read and parse a hostfile, rejecting duplicate hosts.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        Self::from_file_with(path, false)
    }

    /// Read and parse a hostfile, optionally tolerating duplicate hosts
    /// (useful when several slots of a local test run share `localhost`).
    pub fn from_file_with(path: &Path, allow_duplicates: bool) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let hosts = parse_lines(&content, allow_duplicates)?;
        if hosts.is_empty() {
            return Err(ConfigError::EmptyHostfile(path.to_path_buf()));
        }
        debug!(path = %path.display(), hosts = hosts.len(), "hostfile loaded");
        Ok(Self { hosts })
    }

    /// Parse hostfile text that did not come from disk.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let hosts = parse_lines(content, false)?;
        if hosts.is_empty() {
            return Err(ConfigError::EmptyHostfile("<inline>".into()));
        }
        Ok(Self { hosts })
    }

    /// Build a host list from identifiers already in memory.
    pub fn from_hosts<I, S>(hosts: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = hosts
            .into_iter()
            .map(Into::into)
            .collect::<Vec<String>>()
            .join("\n");
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Always false for a constructed list; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.hosts.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }

    /// Comma-joined host list, the format of the `--hosts` flag.
    pub fn joined(&self) -> String {
        self.hosts.join(",")
    }
}

fn parse_lines(content: &str, allow_duplicates: bool) -> ConfigResult<Vec<String>> {
    let mut hosts = Vec::new();
    let mut seen = HashSet::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Machine files sometimes carry extra columns (slots, ports); the
        // host is always the first token.
        let mut tokens = line.split_whitespace();
        let Some(host) = tokens.next() else {
            continue;
        };
        if tokens.next().is_some() {
            debug!(line = idx + 1, %host, "ignoring trailing hostfile columns");
        }

        if !seen.insert(host.to_string()) && !allow_duplicates {
            return Err(ConfigError::DuplicateHost {
                host: host.to_string(),
                line: idx + 1,
            });
        }
        hosts.push(host.to_string());
    }

    Ok(hosts)
}
