//! Role planner: assigns worker and server slots to hosts.
//!
//! Every host receives the same number of worker slots (W) and server
//! slots (S). Ranks are dense per role and assigned by host order, then by
//! slot order within the host:
//!
//! ```text
//! hosts = [a, b], W = 2, S = 1
//!   a: worker 0, worker 1, server 0
//!   b: worker 2, worker 3, server 1
//! ```
//!
//! Launched processes derive peer addresses from this mapping, so it must
//! be reproducible from the same hostfile and counts.

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::hostfile::HostList;
use crate::types::{ProcessTarget, Role};

/// Upper bound on processes in one job.
pub const MAX_PROCESSES: u32 = 1 << 20;

/// One process slot in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub role: Role,
    /// Global rank within `role`.
    pub rank: u32,
    /// Index of the host in the hostfile (the node id).
    pub host_index: usize,
    /// Position of this slot among the host's slots of the same role.
    pub local_index: u32,
}

/// Slot counts assigned to a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAssignment {
    pub worker_count: u32,
    pub server_count: u32,
}

/// The full role assignment for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePlan {
    hosts: HostList,
    workers_per_node: u32,
    servers_per_node: u32,
    total_workers: u32,
    total_servers: u32,
    slots: Vec<Slot>,
}

impl RolePlan {
    /// Plan W workers and S servers on every host.
    ///
    /// Counts are signed because they arrive from untyped configuration;
    /// negative counts, an all-zero plan, and plans larger than
    /// [`MAX_PROCESSES`] are rejected.
    pub fn new(hosts: &HostList, workers_per_node: i64, servers_per_node: i64) -> ConfigResult<Self> {
        let workers = slot_count(Role::Worker, workers_per_node)?;
        let servers = slot_count(Role::Server, servers_per_node)?;
        if workers == 0 && servers == 0 {
            return Err(ConfigError::NothingToLaunch);
        }

        let total_workers = role_total(Role::Worker, hosts.len(), workers)?;
        let total_servers = role_total(Role::Server, hosts.len(), servers)?;
        if total_workers + total_servers > MAX_PROCESSES {
            return Err(ConfigError::Invalid(format!(
                "plan has {} processes, more than the limit of {MAX_PROCESSES}",
                u64::from(total_workers) + u64::from(total_servers)
            )));
        }

        let mut slots = Vec::with_capacity((total_workers + total_servers) as usize);
        let mut next_worker = 0u32;
        let mut next_server = 0u32;

        for host_index in 0..hosts.len() {
            for local_index in 0..workers {
                slots.push(Slot {
                    role: Role::Worker,
                    rank: next_worker,
                    host_index,
                    local_index,
                });
                next_worker += 1;
            }
            for local_index in 0..servers {
                slots.push(Slot {
                    role: Role::Server,
                    rank: next_server,
                    host_index,
                    local_index,
                });
                next_server += 1;
            }
        }

        debug!(
            hosts = hosts.len(),
            workers = next_worker,
            servers = next_server,
            "role plan computed"
        );

        Ok(Self {
            hosts: hosts.clone(),
            workers_per_node: workers,
            servers_per_node: servers,
            total_workers,
            total_servers,
            slots,
        })
    }

    pub fn hosts(&self) -> &HostList {
        &self.hosts
    }

    /// All slots in launch order (host order, workers before servers).
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn total_workers(&self) -> u32 {
        self.total_workers
    }

    pub fn total_servers(&self) -> u32 {
        self.total_servers
    }

    pub fn assignment(&self, host_index: usize) -> Option<HostAssignment> {
        (host_index < self.hosts.len()).then_some(HostAssignment {
            worker_count: self.workers_per_node,
            server_count: self.servers_per_node,
        })
    }

    /// Worker ranks hosted on `host_index`.
    pub fn workers_on(&self, host_index: usize) -> Vec<u32> {
        self.ranks_on(host_index, Role::Worker)
    }

    /// Server ranks hosted on `host_index`.
    pub fn servers_on(&self, host_index: usize) -> Vec<u32> {
        self.ranks_on(host_index, Role::Server)
    }

    /// Host name of a slot.
    pub fn host_of(&self, slot: &Slot) -> &str {
        // host_index always comes from iterating `hosts` in `new`.
        self.hosts.get(slot.host_index).unwrap_or_default()
    }

    pub fn target(&self, slot: &Slot) -> ProcessTarget {
        ProcessTarget {
            host: self.host_of(slot).to_string(),
            role: slot.role,
            rank: slot.rank,
        }
    }

    fn ranks_on(&self, host_index: usize, role: Role) -> Vec<u32> {
        self.slots
            .iter()
            .filter(|s| s.host_index == host_index && s.role == role)
            .map(|s| s.rank)
            .collect()
    }
}

fn slot_count(role: Role, count: i64) -> ConfigResult<u32> {
    if count < 0 {
        return Err(ConfigError::NegativeSlots {
            role: role.as_str(),
            count,
        });
    }
    u32::try_from(count).map_err(|_| {
        ConfigError::Invalid(format!("{role} slots per node out of range: {count}"))
    })
}

/// `hosts × per_node`, bounded by [`MAX_PROCESSES`].
fn role_total(role: Role, hosts: usize, per_node: u32) -> ConfigResult<u32> {
    u32::try_from(hosts)
        .ok()
        .and_then(|h| h.checked_mul(per_node))
        .filter(|total| *total <= MAX_PROCESSES)
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "{hosts} hosts with {per_node} {role} slots each exceeds the limit of {MAX_PROCESSES} processes"
            ))
        })
}
