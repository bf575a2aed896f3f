use crate::instance::{load_instance_config, InstanceConfig};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk shape of a topology file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TopologyFile {
    pub chassis_instances: Vec<String>,
    #[serde(default)]
    pub neighbor_instances: Vec<String>,
    /// Edge id -> (instance id -> local interface name).
    #[serde(default)]
    pub neighbor_connections: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyFormat {
    Json,
    Toml,
}

impl TopologyFormat {
    /// `.toml` selects TOML; everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => TopologyFormat::Toml,
            _ => TopologyFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceRole {
    Chassis,
    Neighbor,
}

impl std::fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceRole::Chassis => write!(f, "chassis"),
            InstanceRole::Neighbor => write!(f, "neighbor"),
        }
    }
}

/// One declared instance with its static-config directory resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub id: String,
    pub role: InstanceRole,
    pub dir: PathBuf,
    pub config: InstanceConfig,
}

/// A validated topology with every instance's static config loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySpec {
    pub base_dir: PathBuf,
    pub instances: Vec<InstanceSpec>,
    pub neighbor_instances: Vec<InstanceSpec>,
    pub neighbor_connections: BTreeMap<String, BTreeMap<String, String>>,
}

impl TopologySpec {
    /// Chassis instances first, then neighbors, each in declaration order.
    pub fn all_instances(&self) -> impl Iterator<Item = &InstanceSpec> {
        self.instances.iter().chain(self.neighbor_instances.iter())
    }

    pub fn instance(&self, id: &str) -> Option<&InstanceSpec> {
        self.all_instances().find(|i| i.id == id)
    }

    /// Edges naming `id`, as `(edge id, local interface)`.
    pub fn edges_for<'a>(&'a self, id: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.neighbor_connections.iter().filter_map(move |(edge, members)| {
            members
                .get(id)
                .map(|ifname| (edge.as_str(), ifname.as_str()))
        })
    }

    /// Sum of the front-panel port counts declared by chassis instances.
    pub fn chassis_port_total(&self) -> usize {
        self.instances
            .iter()
            .map(|i| i.config.port_count as usize)
            .sum()
    }
}

impl TopologyFile {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.chassis_instances.is_empty() {
            return Err(SchemaError::NoChassisInstances);
        }

        let mut seen = BTreeSet::new();
        for id in self.chassis_instances.iter().chain(&self.neighbor_instances) {
            if !is_valid_identifier(id) {
                return Err(SchemaError::InvalidInstanceId(id.clone()));
            }
            if !seen.insert(id.as_str()) {
                return Err(SchemaError::DuplicateInstance(id.clone()));
            }
        }

        // (instance, interface) -> edge that claimed it
        let mut claimed: BTreeMap<(&str, &str), &str> = BTreeMap::new();
        for (edge, members) in &self.neighbor_connections {
            if members.len() != 2 {
                return Err(SchemaError::EdgeArity {
                    edge: edge.clone(),
                    found: members.len(),
                });
            }
            for (instance, interface) in members {
                if !seen.contains(instance.as_str()) {
                    return Err(SchemaError::UnknownInstance {
                        edge: edge.clone(),
                        instance: instance.clone(),
                    });
                }
                if parse_port_index(interface).is_none() {
                    return Err(SchemaError::InvalidInterface {
                        edge: edge.clone(),
                        instance: instance.clone(),
                        interface: interface.clone(),
                    });
                }
                if let Some(first) = claimed.insert((instance.as_str(), interface.as_str()), edge.as_str()) {
                    return Err(SchemaError::InterfaceReused {
                        instance: instance.clone(),
                        interface: interface.clone(),
                        first: first.to_owned(),
                        second: edge.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Position of a port interface in an instance's reserved pool: `eth3` -> 3.
/// `eth0` is the control interface and is not part of the pool.
pub fn parse_port_index(ifname: &str) -> Option<u32> {
    let digits = ifname.strip_prefix("eth")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || digits.starts_with('0')
    {
        return None;
    }
    digits.parse().ok().filter(|n| *n >= 1)
}

fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 32
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Unique topology names end up in namespace and container names.
pub fn validate_topology_name(name: &str) -> Result<(), SchemaError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_owned()))
    }
}

pub fn parse_topology_str(input: &str, format: TopologyFormat) -> Result<TopologyFile, SchemaError> {
    let file: TopologyFile = match format {
        TopologyFormat::Json => serde_json::from_str(input)?,
        TopologyFormat::Toml => toml::from_str(input)?,
    };
    file.validate()?;
    Ok(file)
}

/// Read and validate a topology file, then load the static config of every
/// instance from `<topology dir>/<instance id>/`.
pub fn load_topology(path: impl AsRef<Path>) -> Result<TopologySpec, SchemaError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let file = parse_topology_str(&content, TopologyFormat::from_path(path))?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let resolve = |ids: &[String], role: InstanceRole| -> Result<Vec<InstanceSpec>, SchemaError> {
        ids.iter()
            .map(|id| {
                let dir = base_dir.join(id);
                let config = load_instance_config(id, &dir)?;
                Ok(InstanceSpec {
                    id: id.clone(),
                    role,
                    dir,
                    config,
                })
            })
            .collect()
    };

    let instances = resolve(&file.chassis_instances, InstanceRole::Chassis)?;
    let neighbor_instances = resolve(&file.neighbor_instances, InstanceRole::Neighbor)?;

    Ok(TopologySpec {
        base_dir: base_dir.clone(),
        instances,
        neighbor_instances,
        neighbor_connections: file.neighbor_connections,
    })
}
