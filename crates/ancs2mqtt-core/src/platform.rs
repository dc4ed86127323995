//! Platform seams.
//!
//! The supervisor never touches radios, sockets or clocks directly. Each
//! target (ESP32 firmware, a Linux host, a test harness) implements these
//! traits and injects them at construction.
//!
//! All methods are synchronous and must return promptly; the supervisor polls
//! them from a single tick loop.

use crate::config::Credentials;

/// MQTT delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// The MQTT client session.
pub trait BrokerSession {
    /// Target broker for the next [`connect`](Self::connect).
    fn set_host(&mut self, host: &str, port: u16);

    /// Last will registered with the broker on the next connect.
    fn set_last_will(&mut self, topic: &str, payload: &str, retained: bool);

    /// Try to establish a session. Returns `true` once the broker accepted it.
    fn connect(&mut self, client_id: &str, credentials: Credentials<'_>) -> bool;

    fn is_connected(&self) -> bool;

    /// Queue a publish. `false` means it was not accepted; callers do not retry.
    fn publish(&mut self, topic: &str, payload: &str, retained: bool, qos: QoS) -> bool;

    /// Drive the session's own I/O. Called once per tick.
    fn advance(&mut self);
}

/// The WiFi (or other) network link.
pub trait NetworkLayer {
    /// Station link is up and has an address.
    fn is_network_ready(&self) -> bool;

    /// Current IPv4 address octets, `[0, 0, 0, 0]` when unknown.
    fn local_ip(&self) -> [u8; 4];

    /// Process pending network work. Called once per tick.
    fn advance(&mut self);
}

/// Monotonic time source.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_millis(&self) -> u64;
}

/// Device-level control.
pub trait DeviceControl {
    /// Restart the device. On hardware this does not return.
    fn restart(&mut self);
}
