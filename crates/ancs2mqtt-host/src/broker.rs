//! MQTT session on top of rumqttc's blocking client.
//!
//! rumqttc only does network I/O while its `Connection` is polled. The
//! supervisor polls through [`BrokerSession::advance`], which drains pending
//! events for a few milliseconds at most, so one tick never stalls the loop.

use std::time::{Duration, Instant};

use ancs2mqtt_core::{BrokerSession, Credentials, QoS};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, LastWill, MqttOptions, Packet, RecvTimeoutError,
};
use tracing::{debug, info, warn};

/// Events handled per [`advance`](BrokerSession::advance) call at most.
const MAX_EVENTS_PER_ADVANCE: usize = 32;

/// Wait per event while draining.
const DRAIN_WINDOW: Duration = Duration::from_millis(2);

/// Request queue size of the rumqttc client.
const REQUEST_CAPACITY: usize = 10;

struct Link {
    client: Client,
    connection: Connection,
}

/// A [`BrokerSession`] backed by rumqttc.
pub struct RumqttSession {
    host: String,
    port: u16,
    will: Option<LastWill>,
    keep_alive: Duration,
    connect_timeout: Duration,
    link: Option<Link>,
}

impl RumqttSession {
    pub fn new(connect_timeout: Duration, keep_alive: Duration) -> Self {
        Self {
            host: String::new(),
            port: 1883,
            will: None,
            keep_alive,
            connect_timeout,
            link: None,
        }
    }

    fn options(&self, client_id: &str, credentials: Credentials<'_>) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.as_str(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        match credentials {
            Credentials::Anonymous => {}
            Credentials::User { username } => {
                options.set_credentials(username, "");
            }
            Credentials::UserPassword { username, password } => {
                options.set_credentials(username, password);
            }
        }
        if let Some(will) = &self.will {
            options.set_last_will(will.clone());
        }
        options
    }

    /// Poll until the broker answers the CONNECT or the timeout runs out.
    fn await_connack(&self, connection: &mut Connection) -> bool {
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("No CONNACK from {}:{} within {:?}", self.host, self.port, self.connect_timeout);
                return false;
            }

            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return true;
                    }
                    warn!("Broker refused connection: {:?}", ack.code);
                    return false;
                }
                Ok(Ok(event)) => debug!("MQTT event before CONNACK: {:?}", event),
                Ok(Err(e)) => {
                    warn!("MQTT connection error: {}", e);
                    return false;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn drop_link(&mut self) {
        if self.link.take().is_some() {
            info!("MQTT session closed");
        }
    }
}

impl BrokerSession for RumqttSession {
    fn set_host(&mut self, host: &str, port: u16) {
        self.host = host.to_string();
        self.port = port;
    }

    fn set_last_will(&mut self, topic: &str, payload: &str, retained: bool) {
        self.will = Some(LastWill::new(
            topic,
            payload.as_bytes().to_vec(),
            rumqttc::QoS::AtMostOnce,
            retained,
        ));
    }

    fn connect(&mut self, client_id: &str, credentials: Credentials<'_>) -> bool {
        // A fresh attempt always starts from a fresh event loop.
        self.drop_link();

        let (client, mut connection) =
            Client::new(self.options(client_id, credentials), REQUEST_CAPACITY);
        if !self.await_connack(&mut connection) {
            return false;
        }

        self.link = Some(Link { client, connection });
        true
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool, qos: QoS) -> bool {
        let Some(link) = &self.link else {
            return false;
        };
        match link
            .client
            .try_publish(topic, to_rumqttc(qos), retained, payload.as_bytes().to_vec())
        {
            Ok(()) => true,
            Err(e) => {
                debug!("Publish to {} rejected: {}", topic, e);
                false
            }
        }
    }

    fn advance(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        let mut lost = false;
        for _ in 0..MAX_EVENTS_PER_ADVANCE {
            match link.connection.recv_timeout(DRAIN_WINDOW) {
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    warn!("Broker sent DISCONNECT");
                    lost = true;
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("MQTT connection lost: {}", e);
                    lost = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            self.drop_link();
        }
    }
}

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}
