//! Shared identifiers for planned and launched processes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which half of the parameter-server job a process belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Worker,
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Worker => "worker",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(host, role, rank)` triple that identifies one process of a job.
///
/// Launch failures, runtime failures, and cancellation errors are all
/// attributed to a target so an operator can tell exactly which process
/// misbehaved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessTarget {
    pub host: String,
    pub role: Role,
    /// Dense, zero-based rank within `role`.
    pub rank: u32,
}

impl fmt::Display for ProcessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.role, self.rank, self.host)
    }
}
