//! Availability and info announcements.
//!
//! The broker holds a retained availability status under
//! `{prefix}/bridge/LWT`: the last will sets it to `Offline` when the link
//! dies, and [`Announcer::announce`] flips it back to `Online` after every
//! successful connect, followed by the info document.
//!
//! # Example info payload
//!
//! ```json
//! {
//!   "version": "0100",
//!   "name": "ancs2mqtt",
//!   "ssid": "HomeNet",
//!   "ip": "192.168.1.42",
//!   "device-topic": "ancs2mqtt/phone1/+"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::debug;

use crate::config::{Configuration, CONFIG_VERSION};
use crate::platform::{BrokerSession, QoS};
use crate::topic::{TopicNamer, INFO, LWT};

pub const ONLINE: &str = "Online";
pub const OFFLINE: &str = "Offline";
pub const DISCONNECTED: &str = "Disconnected";

/// The `{prefix}/bridge/info` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeInfo {
    /// Configuration layout version.
    pub version: String,
    /// Device display name.
    pub name: String,
    /// WiFi network the device joined.
    pub ssid: String,
    /// Dotted-quad IPv4 address.
    pub ip: String,
    /// Wildcard covering the device-scoped subtree.
    #[serde(rename = "device-topic")]
    pub device_topic: String,
}

impl BridgeInfo {
    pub fn new(name: &str, config: &Configuration, topics: &TopicNamer, ip: [u8; 4]) -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            name: name.to_string(),
            ssid: config.wifi.ssid.clone(),
            ip: dotted_quad(ip),
            device_topic: topics.device_wildcard(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Format four address octets as `a.b.c.d`.
pub fn dotted_quad(octets: [u8; 4]) -> String {
    Ipv4Addr::from(octets).to_string()
}

/// Publishes the bridge availability and info messages.
///
/// Every publish here is fire-and-forget: a rejected publish is logged and
/// never retried.
pub struct Announcer<'a> {
    topics: &'a TopicNamer,
}

impl<'a> Announcer<'a> {
    pub fn new(topics: &'a TopicNamer) -> Self {
        Self { topics }
    }

    /// Register `{prefix}/bridge/LWT = Offline` (retained) as the last will.
    ///
    /// Must happen before connecting so the broker holds the will from the
    /// first packet on.
    pub fn register_will<B: BrokerSession>(&self, broker: &mut B) {
        broker.set_last_will(&self.topics.bridge_topic(LWT), OFFLINE, true);
    }

    /// Publish `Online` and the info document.
    pub fn announce<B: BrokerSession>(&self, broker: &mut B, info: &BridgeInfo) {
        self.publish(broker, LWT, ONLINE, true);

        match info.to_json() {
            Ok(payload) => self.publish(broker, INFO, &payload, false),
            Err(e) => debug!("Skipping info announcement: {}", e),
        }
    }

    /// Best-effort bridge status publish used right before a restart.
    pub fn farewell<B: BrokerSession>(&self, broker: &mut B, subtopic: &str, payload: &str) {
        if !broker.is_connected() {
            debug!("No broker link, skipping {} status", subtopic);
            return;
        }
        self.publish(broker, subtopic, payload, true);
    }

    fn publish<B: BrokerSession>(
        &self,
        broker: &mut B,
        subtopic: &str,
        payload: &str,
        retained: bool,
    ) {
        let topic = self.topics.bridge_topic(subtopic);
        if !broker.publish(&topic, payload, retained, QoS::AtMostOnce) {
            debug!("Publish to {} was not accepted", topic);
        }
    }
}
