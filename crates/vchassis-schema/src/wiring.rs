use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const WIRING_FILE: &str = "wiring.json";

/// The two ends of a virtual interface pair: the end left in the topology
/// namespace and the name the other end carries inside the instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfacePair {
    pub host: String,
    pub instance: String,
}

/// Written beside an instance's static config after `create`. The instance's
/// own startup tooling reads it to configure itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WiringArtifact {
    pub topology: String,
    pub namespace: String,
    pub shared_bridge: String,
    pub instance: String,
    pub control_interface: String,
    pub inband_pair: Option<InterfacePair>,
    /// Local interface -> edge bridge it is attached to.
    pub neighbor_bridges: BTreeMap<String, String>,
    pub interfaces: BTreeSet<String>,
    pub generated_at: String,
}

impl WiringArtifact {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(WIRING_FILE)
    }

    /// Atomically replace `<dir>/wiring.json`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, SchemaError> {
        let dest = Self::path_in(dir);
        let content = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| SchemaError::Io(e.error))?;
        Ok(dest)
    }

    pub fn read_from_dir(dir: &Path) -> Result<Self, SchemaError> {
        let content = fs::read_to_string(Self::path_in(dir))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns whether a file was removed.
    pub fn remove_from_dir(dir: &Path) -> Result<bool, SchemaError> {
        let path = Self::path_in(dir);
        if path.exists() {
            fs::remove_file(path)?;
            return Ok(true);
        }
        Ok(false)
    }
}
