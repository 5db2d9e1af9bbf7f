//! Configuration error types.
//!
//! Every `ConfigError` is raised before any process is launched, so a job
//! that fails validation leaves no partial side effects behind.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration and planning operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Malformed or incomplete launch input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hostfile {0} contains no hosts")]
    EmptyHostfile(PathBuf),

    #[error("duplicate host '{host}' on line {line}")]
    DuplicateHost { host: String, line: usize },

    #[error("missing required parameter: {0}")]
    MissingParam(String),

    #[error("parameter '{key}' must be finite, got {value}")]
    NonFiniteParam { key: String, value: f64 },

    #[error("parameter '{key}' expects {expected}, got {found}")]
    ParamType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unknown parameter: {0}")]
    UnknownParam(String),

    #[error("parameter '{0}' is injected by the launcher and cannot be set")]
    ReservedParam(String),

    #[error("{role} slots per node must not be negative, got {count}")]
    NegativeSlots { role: &'static str, count: i64 },

    #[error("nothing to launch: workers and servers per node are both zero")]
    NothingToLaunch,

    #[error("invalid environment entry '{0}': expected KEY=value")]
    InvalidEnv(String),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("invalid job file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}
