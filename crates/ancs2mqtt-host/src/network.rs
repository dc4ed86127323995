//! Host network probe.
//!
//! A Linux host has no station link to bring up; "network ready" means the
//! routing table can reach the probe address. Connecting a UDP socket sends
//! no packets but makes the kernel pick the outbound interface, whose
//! address is what the bridge reports as its IP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use ancs2mqtt_core::NetworkLayer;
use tracing::{debug, info, warn};

/// How often the route is re-checked.
const PROBE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct HostNetwork {
    probe_target: SocketAddr,
    address: Option<Ipv4Addr>,
    last_probe: Option<Instant>,
}

impl HostNetwork {
    pub fn new(probe_target: SocketAddr) -> Self {
        Self {
            probe_target,
            address: None,
            last_probe: None,
        }
    }

    fn probe(&self) -> Option<Ipv4Addr> {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Network probe socket failed: {}", e);
                return None;
            }
        };
        if let Err(e) = socket.connect(self.probe_target) {
            debug!("No route to {}: {}", self.probe_target, e);
            return None;
        }

        match socket.local_addr().map(|addr| addr.ip()) {
            Ok(IpAddr::V4(ip)) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

impl NetworkLayer for HostNetwork {
    fn is_network_ready(&self) -> bool {
        self.address.is_some()
    }

    fn local_ip(&self) -> [u8; 4] {
        self.address.map(|ip| ip.octets()).unwrap_or([0; 4])
    }

    fn advance(&mut self) {
        let due = self
            .last_probe
            .map_or(true, |at| at.elapsed() >= PROBE_INTERVAL);
        if !due {
            return;
        }
        self.last_probe = Some(Instant::now());

        let address = self.probe();
        if address != self.address {
            match address {
                Some(ip) => info!("Network ready, local address {}", ip),
                None => warn!("Network lost"),
            }
            self.address = address;
        }
    }
}
