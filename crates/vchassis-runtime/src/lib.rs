//! Host command runners for vchassis.
//!
//! Every provisioning step is a typed `HostCommand` handed to an injected
//! `CommandRunner`. `HostRunner` renders commands to `ip` and container-engine
//! invocations and classifies their failures once; `SimulatedHost` interprets
//! the same commands against an in-memory model of namespaces, bridges,
//! interface pairs and instances, so provisioning sequences can be exercised
//! without touching the real system.

pub mod command;
pub mod host;
pub mod mock;
pub mod prereq;
pub mod resource;
pub mod runner;

pub use command::{CommandError, CommandOutput, HostCommand, InstanceLaunch};
pub use host::HostRunner;
pub use mock::SimulatedHost;
pub use prereq::{check_host_prereqs, format_missing, MissingPrereq};
pub use resource::{ResourceHandle, ResourceKind, ResourceState};
pub use runner::{select_runner, CommandRunner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown runner '{0}', expected 'host' or 'mock'")]
    UnknownRunner(String),
}
