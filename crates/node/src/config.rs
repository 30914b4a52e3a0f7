//! Node configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::NodeError;

/// Everything a node instance needs to start (loaded from node.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Display name of this device; the hostname when unset.
    pub device_name: String,
    /// Display name of the owning user account.
    pub user_name: String,
    /// Interface both listeners bind.
    pub listen: String,
    /// Listener ports; 0 asks the OS for an ephemeral port.
    pub ports: PortsConfig,
    /// Directory for identity, agent directory and settings JSON.
    pub storage: PathBuf,
    /// zstd level asked of copy sources; 0 transfers raw bytes.
    pub compression: i32,
    /// Outbound fragmentation threshold in bytes for peer sockets.
    pub fragmentation: usize,
    /// Seconds of silence before this node announces itself idle.
    pub idle_threshold_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub http: u16,
    pub ws: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_name: hostname(),
            user_name: "user".into(),
            listen: "0.0.0.0".into(),
            ports: PortsConfig::default(),
            storage: PathBuf::from("storage"),
            compression: 3,
            fragmentation: 1_000_000,
            idle_threshold_secs: 15,
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self { http: 8500, ws: 8501 }
    }
}

impl NodeConfig {
    /// Reads and parses a configuration file; a missing file yields
    /// the defaults.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "sharemesh".into())
}
