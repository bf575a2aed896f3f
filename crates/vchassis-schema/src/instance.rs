use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const INSTANCE_CONFIG_JSON: &str = "instance.json";
pub const INSTANCE_CONFIG_TOML: &str = "instance.toml";

/// Static config of one instance, read from its own directory.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub hostname: String,
    /// Address (CIDR) of the inband port on the shared bridge.
    #[serde(default)]
    pub inband_address: Option<String>,
    /// Address of the chassis-wide control-plane database.
    #[serde(default)]
    pub chassis_db_address: Option<String>,
    /// Front-panel ports this instance publishes into the chassis database.
    #[serde(default)]
    pub port_count: u32,
    /// Local interface -> CIDR, used to resolve reachability probe targets.
    #[serde(default)]
    pub interface_addresses: BTreeMap<String, String>,
}

impl InstanceConfig {
    pub fn has_inband(&self) -> bool {
        self.inband_address.is_some()
    }

    /// Configured address of `ifname` with any prefix length stripped.
    pub fn address_of(&self, ifname: &str) -> Option<&str> {
        self.interface_addresses
            .get(ifname)
            .map(|cidr| cidr.split('/').next().unwrap_or(cidr.as_str()))
    }
}

/// Load `instance.json` (preferred) or `instance.toml` from `dir`.
pub fn load_instance_config(instance: &str, dir: &Path) -> Result<InstanceConfig, SchemaError> {
    let config_err = |path: &Path, reason: String| SchemaError::InstanceConfig {
        instance: instance.to_owned(),
        path: path.display().to_string(),
        reason,
    };

    let json_path = dir.join(INSTANCE_CONFIG_JSON);
    let toml_path = dir.join(INSTANCE_CONFIG_TOML);

    let config: InstanceConfig = if json_path.exists() {
        let content =
            fs::read_to_string(&json_path).map_err(|e| config_err(&json_path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| config_err(&json_path, e.to_string()))?
    } else if toml_path.exists() {
        let content =
            fs::read_to_string(&toml_path).map_err(|e| config_err(&toml_path, e.to_string()))?;
        toml::from_str(&content).map_err(|e| config_err(&toml_path, e.to_string()))?
    } else {
        return Err(config_err(dir, "no instance.json or instance.toml".to_owned()));
    };

    if config.hostname.trim().is_empty() {
        return Err(config_err(dir, "hostname must not be empty".to_owned()));
    }
    Ok(config)
}
