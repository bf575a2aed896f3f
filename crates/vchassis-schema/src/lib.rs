//! Topology file parsing, instance static config, and wiring artifacts for vchassis.
//!
//! This crate defines the declarative layer: the topology file (`TopologyFile`)
//! listing chassis and neighbor instances and the edges joining them, the
//! per-instance static config (`InstanceConfig`) read from each instance
//! directory, the resolved `TopologySpec` handed to the provisioner, and the
//! `WiringArtifact` written back beside each instance's config after `create`.

pub mod instance;
pub mod topology;
pub mod wiring;

pub use instance::{load_instance_config, InstanceConfig, INSTANCE_CONFIG_JSON, INSTANCE_CONFIG_TOML};
pub use topology::{
    load_topology, parse_port_index, parse_topology_str, validate_topology_name, InstanceRole,
    InstanceSpec, TopologyFile, TopologyFormat, TopologySpec,
};
pub use wiring::{InterfacePair, WiringArtifact, WIRING_FILE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read topology file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse topology file: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("failed to parse topology file: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("topology declares no chassis instances")]
    NoChassisInstances,
    #[error("invalid instance id '{0}', expected 1-32 characters of [a-zA-Z0-9_-]")]
    InvalidInstanceId(String),
    #[error("instance '{0}' is declared more than once")]
    DuplicateInstance(String),
    #[error("edge '{edge}' must join exactly two instances, found {found}")]
    EdgeArity { edge: String, found: usize },
    #[error("edge '{edge}' references undeclared instance '{instance}'")]
    UnknownInstance { edge: String, instance: String },
    #[error("edge '{edge}': '{interface}' on '{instance}' is not a port interface (expected eth<N>, N >= 1)")]
    InvalidInterface {
        edge: String,
        instance: String,
        interface: String,
    },
    #[error("interface '{interface}' on '{instance}' is used by both '{first}' and '{second}'")]
    InterfaceReused {
        instance: String,
        interface: String,
        first: String,
        second: String,
    },
    #[error("instance '{instance}': invalid static config at {path}: {reason}")]
    InstanceConfig {
        instance: String,
        path: String,
        reason: String,
    },
    #[error("invalid topology name '{0}', expected 1-32 characters of [a-zA-Z0-9_-]")]
    InvalidName(String),
}
