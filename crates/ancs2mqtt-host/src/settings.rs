//! Host runtime settings.
//!
//! These describe the process, not the device: where the configuration
//! region lives, where the portal listens, how fast the loop ticks. Loaded
//! from a JSON file; every field is optional.
//!
//! ```json
//! {
//!   "name": "ancs2mqtt",
//!   "storagePath": "/var/lib/ancs2mqtt/config.bin",
//!   "portalAddr": "0.0.0.0:8080",
//!   "tickIntervalMs": 50,
//!   "rebootPauseMs": 1000
//! }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeSettings {
    /// Display name; also the MQTT client id.
    pub name: String,
    /// File backing the configuration region.
    pub storage_path: PathBuf,
    pub portal_addr: SocketAddr,
    pub tick_interval_ms: u64,
    /// Upper bound on waiting for the broker's CONNACK.
    pub connect_timeout_ms: u64,
    pub keep_alive_secs: u64,
    /// Wait between a restart and the next boot.
    pub reboot_pause_ms: u64,
    /// Address whose route decides network readiness.
    pub route_probe: SocketAddr,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            name: "ancs2mqtt".to_string(),
            storage_path: PathBuf::from("ancs2mqtt-config.bin"),
            portal_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tick_interval_ms: 50,
            connect_timeout_ms: 500,
            keep_alive_secs: 30,
            reboot_pause_ms: 1000,
            route_probe: SocketAddr::from(([8, 8, 8, 8], 53)),
        }
    }
}

impl BridgeSettings {
    /// Load settings from `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            info!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Never shorter than one tick.
    pub fn reboot_pause(&self) -> Duration {
        Duration::from_millis(self.reboot_pause_ms).max(self.tick_interval())
    }
}
