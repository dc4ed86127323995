//! Topic namespace derivation.
//!
//! Two namespaces hang off the configured prefix:
//!
//! - bridge-wide: `{prefix}/bridge/{sub}` (availability, info)
//! - device-scoped: `{prefix}/{device_id}/{sub}` (notifications)
//!
//! They cannot collide as long as the device id is not literally `bridge`,
//! and the device id never contains `/` (enforced by validation).

use crate::config::Configuration;

/// Segment reserved for the bridge-wide namespace.
pub const BRIDGE_SEGMENT: &str = "bridge";

/// Availability topic carrying the retained `Online`/`Offline` status.
pub const LWT: &str = "LWT";

/// Announcement topic carrying the bridge info document.
pub const INFO: &str = "info";

/// Legacy connection-state topic published when the device is reset.
pub const STATE: &str = "state";

/// Builds fully-qualified topic strings for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamer {
    prefix: String,
    device_id: String,
}

impl TopicNamer {
    pub fn new(prefix: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            device_id: device_id.into(),
        }
    }

    pub fn for_config(config: &Configuration) -> Self {
        Self::new(&config.topic_prefix, &config.device_id)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// `{prefix}/bridge/{sub}`
    pub fn bridge_topic(&self, sub: &str) -> String {
        format!("{}/{}/{}", self.prefix, BRIDGE_SEGMENT, sub)
    }

    /// `{prefix}/{device_id}/{sub}`
    pub fn device_topic(&self, sub: &str) -> String {
        format!("{}/{}/{}", self.prefix, self.device_id, sub)
    }

    /// Single-level wildcard covering this device's subtree.
    pub fn device_wildcard(&self) -> String {
        self.device_topic("+")
    }
}
