//! # ancs2mqtt-host
//!
//! Runs the ancs2mqtt supervisor on a Linux host.
//!
//! This crate provides:
//! - A file-backed configuration region
//! - An MQTT broker session on rumqttc
//! - A network probe, monotonic clock and in-process restart
//! - The captive-portal web form (axum)
//! - The blocking supervisor loop tying them together
//!
//! ## Usage
//!
//! ```rust,ignore
//! let settings = BridgeSettings::load(Path::new("settings.json"))?;
//! let (portal, mut inbox) = portal::channel(16);
//!
//! tokio::spawn(portal::serve(settings.portal_addr, portal));
//! tokio::task::spawn_blocking(move || runner::run(&settings, &mut inbox, &shutdown));
//! ```

pub mod broker;
pub mod file_region;
pub mod network;
pub mod portal;
pub mod runner;
pub mod settings;
pub mod system;

pub use broker::RumqttSession;
pub use file_region::FileRegion;
pub use network::HostNetwork;
pub use portal::{PortalHandle, PortalInbox, PortalRequest, PortalView};
pub use runner::{boot, run, run_with, HostSupervisor};
pub use settings::{BridgeSettings, SettingsError};
pub use system::{MonotonicClock, SoftRestart};
