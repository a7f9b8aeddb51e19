//! Component configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use vmesh_bmf::InterfaceId;

use crate::error::{RuntimeError, RuntimeResult};

/// Component configuration, loaded from TOML.
///
/// ```toml
/// component_id = "node-b"
/// default_hop_count = 4
///
/// [[interfaces]]
/// name = "west"
/// port = 1
///
/// [[interfaces]]
/// name = "tap"
/// port = 9
/// logging_only = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// This component's id (CID)
    pub component_id: String,

    /// Hop budget given to broadcasts this component originates
    pub default_hop_count: i64,

    /// Poll loop tick
    pub poll_interval_ms: u64,

    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,

    pub interfaces: Vec<InterfaceConfig>,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            component_id: String::new(),
            default_hop_count: 8,
            poll_interval_ms: 10,
            log_level: "info".to_string(),
            interfaces: Vec::new(),
        }
    }
}

impl ComponentConfig {
    /// Defaults with the given component id.
    pub fn named(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            ..Default::default()
        }
    }

    /// Load configuration from file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: ComponentConfig =
            toml::from_str(&contents).map_err(|e| RuntimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> RuntimeResult<()> {
        for (i, iface) in self.interfaces.iter().enumerate() {
            if self.interfaces[..i].iter().any(|other| other.port == iface.port) {
                return Err(RuntimeError::DuplicateInterface(iface.port));
            }
        }
        Ok(())
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

/// One external interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,

    /// Port number routes use to select this interface
    pub port: InterfaceId,

    /// Logging interfaces are never relayed through
    #[serde(default)]
    pub logging_only: bool,
}

impl InterfaceConfig {
    pub fn new(name: impl Into<String>, port: InterfaceId) -> Self {
        Self {
            name: name.into(),
            port,
            logging_only: false,
        }
    }

    pub fn logging(name: impl Into<String>, port: InterfaceId) -> Self {
        Self {
            logging_only: true,
            ..Self::new(name, port)
        }
    }
}
