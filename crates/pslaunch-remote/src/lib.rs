//! pslaunch-remote — starts, watches, and stops processes on cluster hosts.
//!
//! The [`Launcher`] trait is the only thing the supervisor sees. Two
//! transports implement it:
//!
//! - [`SshLauncher`] runs each process through the system `ssh` client,
//!   optionally probing the host for the program first.
//! - [`LocalLauncher`] spawns processes on this machine.
//!
//! [`HostRouter`] picks between them per host.

pub mod error;
pub mod launcher;
pub mod local;
pub mod router;
pub mod ssh;

pub use error::{KillError, LaunchError, LaunchErrorKind, LaunchResult, ProcessError};
pub use launcher::{ExitStatus, Launcher, RemoteProcess};
pub use local::LocalLauncher;
pub use router::{HostRouter, is_loopback};
pub use ssh::SshLauncher;
