use crate::context::{DEFAULT_IMAGE, DEFAULT_PORT_COUNT, MAX_PORT_COUNT};
use crate::poll::{PollingConfig, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};
use crate::provision::{DEFAULT_LINK_POLL_INTERVAL, DEFAULT_LINK_POLL_TIMEOUT};
use crate::verify::DEFAULT_PROBE_COUNT;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PollingSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_strict() -> bool {
    true
}

impl PollingSettings {
    fn from_config(config: PollingConfig) -> Self {
        Self {
            interval_ms: config.interval.as_millis() as u64,
            timeout_ms: config.timeout.as_millis() as u64,
            strict: config.strict,
        }
    }

    pub fn to_config(self) -> PollingConfig {
        PollingConfig::new(
            Duration::from_millis(self.interval_ms),
            Duration::from_millis(self.timeout_ms),
            self.strict,
        )
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self::from_config(PollingConfig::new(
            DEFAULT_POLL_INTERVAL,
            DEFAULT_POLL_TIMEOUT,
            true,
        ))
    }
}

fn default_link_polling() -> PollingSettings {
    PollingSettings::from_config(PollingConfig::new(
        DEFAULT_LINK_POLL_INTERVAL,
        DEFAULT_LINK_POLL_TIMEOUT,
        true,
    ))
}

/// Settings file: `$XDG_CONFIG_HOME/vchassis/config.toml`, or
/// `~/.config/vchassis/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    pub image: String,
    /// Docker-compatible container engine binary.
    pub engine: String,
    pub source_mount: Option<PathBuf>,
    pub port_count: u32,
    pub probe_count: u32,
    pub polling: PollingSettings,
    #[serde(default = "default_link_polling")]
    pub link_polling: PollingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_owned(),
            engine: "docker".to_owned(),
            source_mount: None,
            port_count: DEFAULT_PORT_COUNT,
            probe_count: DEFAULT_PROBE_COUNT,
            polling: PollingSettings::default(),
            link_polling: default_link_polling(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| CoreError::Settings(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `explicit` if given, else the default file when it exists, else
    /// built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, CoreError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_settings_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.polling.interval_ms == 0 || self.link_polling.interval_ms == 0 {
            return Err(CoreError::Settings(
                "polling interval_ms must be greater than zero".to_owned(),
            ));
        }
        if self.port_count > MAX_PORT_COUNT {
            return Err(CoreError::Settings(format!(
                "port_count {} exceeds the maximum of {MAX_PORT_COUNT}",
                self.port_count
            )));
        }
        if self.engine.trim().is_empty() {
            return Err(CoreError::Settings("engine must not be empty".to_owned()));
        }
        Ok(())
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("vchassis/config.toml"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/vchassis/config.toml"))
}
