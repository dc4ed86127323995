//! Connection lifecycle supervisor.
//!
//! One owner calls [`ConnectionSupervisor::tick`] in a loop. Each tick:
//!
//! 1. consumes a reset requested by the previous boot (wipe, restart),
//! 2. advances the network layer and the broker session,
//! 3. runs the connect/retry policy while provisioned,
//! 4. derives the [`ConnectionState`],
//! 5. walks the two-step restart (farewell, settle deadline, restart).
//!
//! Nothing here blocks or sleeps; time only enters through the injected
//! [`Clock`].

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::announce::{Announcer, BridgeInfo, OFFLINE};
use crate::config::{ConfigForm, Configuration, DEFAULT_PORT};
use crate::platform::{BrokerSession, Clock, DeviceControl, NetworkLayer, QoS};
use crate::provisioning::{GateState, ProvisioningGate};
use crate::store::{ConfigError, StorageRegion};
use crate::topic::{TopicNamer, LWT};

/// Minimum spacing between two broker connect attempts.
pub const CONNECT_INTERVAL_MS: u64 = 1000;

/// Delay between the farewell publish and the actual restart.
pub const RESTART_SETTLE_MS: u64 = 1000;

/// Live connectivity status, derived once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No usable configuration; only the portal runs.
    Provisioning,
    /// Provisioned, waiting for the station link.
    AwaitingNetwork,
    /// Network up, no broker session established yet this boot.
    ConnectingBroker,
    Online,
    /// A broker session existed this boot and was lost.
    Disconnected,
}

/// Work the supervisor still owes. Cleared once acted upon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingActions {
    pub needs_broker_connect: bool,
    pub needs_restart: bool,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The device was restarted; the owner must stop ticking this instance.
    Restarted,
}

/// Allows one action per interval, tracked by the last granted timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    interval_ms: u64,
    last_attempt: Option<u64>,
}

impl RateLimiter {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_attempt: None,
        }
    }

    /// Grant an attempt at `now` if the interval since the last one elapsed.
    /// The first call is always granted.
    pub fn try_acquire(&mut self, now: u64) -> bool {
        if let Some(last) = self.last_attempt {
            if now.saturating_sub(last) < self.interval_ms {
                return false;
            }
        }
        self.last_attempt = Some(now);
        true
    }

    pub fn last_attempt(&self) -> Option<u64> {
        self.last_attempt
    }
}

type StartedHook = Box<dyn FnOnce() + Send>;

/// Central orchestrator owning every collaborator.
pub struct ConnectionSupervisor<S, B, N, C, D>
where
    S: StorageRegion,
    B: BrokerSession,
    N: NetworkLayer,
    C: Clock,
    D: DeviceControl,
{
    name: String,
    gate: ProvisioningGate<S>,
    broker: B,
    network: N,
    clock: C,
    device: D,
    pending: PendingActions,
    limiter: RateLimiter,
    state: ConnectionState,
    /// Namespace of the configuration this boot runs on.
    topics: Option<TopicNamer>,
    restart_deadline: Option<u64>,
    on_started: Option<StartedHook>,
    was_online: bool,
    restarted: bool,
}

impl<S, B, N, C, D> ConnectionSupervisor<S, B, N, C, D>
where
    S: StorageRegion,
    B: BrokerSession,
    N: NetworkLayer,
    C: Clock,
    D: DeviceControl,
{
    /// `name` is the device display name; it doubles as the MQTT client id.
    pub fn new(
        name: impl Into<String>,
        gate: ProvisioningGate<S>,
        broker: B,
        network: N,
        clock: C,
        device: D,
    ) -> Self {
        let topics = gate.config().map(TopicNamer::for_config);
        let state = match gate.state() {
            GateState::NeedsProvisioning => ConnectionState::Provisioning,
            GateState::Provisioned => ConnectionState::AwaitingNetwork,
        };

        Self {
            name: name.into(),
            gate,
            broker,
            network,
            clock,
            device,
            pending: PendingActions::default(),
            limiter: RateLimiter::new(CONNECT_INTERVAL_MS),
            state,
            topics,
            restart_deadline: None,
            on_started: None,
            was_online: false,
            restarted: false,
        }
    }

    /// Hook run after the first successful broker connection.
    pub fn on_started(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_started = Some(Box::new(hook));
        self
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.restarted {
            return TickOutcome::Restarted;
        }

        if self.gate.reset_requested() {
            self.gate.perform_reset(&mut self.broker, &mut self.device);
            self.state = ConnectionState::Provisioning;
            self.restarted = true;
            return TickOutcome::Restarted;
        }

        self.network.advance();
        self.broker.advance();

        if self.gate.state() == GateState::Provisioned && !self.restart_pending() {
            self.apply_retry_policy();
        }

        self.refresh_state();
        self.handle_restart()
    }

    fn apply_retry_policy(&mut self) {
        if self.pending.needs_broker_connect {
            let now = self.clock.now_millis();
            if !self.limiter.try_acquire(now) {
                return;
            }
            if self.connect() {
                self.pending.needs_broker_connect = false;
            }
        } else if self.network.is_network_ready() && !self.broker.is_connected() {
            debug!("Broker session down, scheduling connect");
            self.pending.needs_broker_connect = true;
        }
    }

    /// One connect attempt, announcing on success.
    fn connect(&mut self) -> bool {
        let Some(config) = self.gate.config() else {
            return false;
        };
        let topics = TopicNamer::for_config(config);
        let announcer = Announcer::new(&topics);

        info!(host = %config.host, port = config.port, "Connecting to MQTT broker");
        self.broker.set_host(&config.host, config.port);
        announcer.register_will(&mut self.broker);

        if !self.broker.connect(&self.name, config.credentials()) {
            warn!(host = %config.host, port = config.port, "MQTT connection failed");
            return false;
        }
        info!("MQTT connected");

        let info = BridgeInfo::new(&self.name, config, &topics, self.network.local_ip());
        announcer.announce(&mut self.broker, &info);

        if let Some(hook) = self.on_started.take() {
            hook();
        }
        true
    }

    fn refresh_state(&mut self) {
        let next = if self.gate.state() == GateState::NeedsProvisioning {
            ConnectionState::Provisioning
        } else if self.broker.is_connected() {
            ConnectionState::Online
        } else if !self.network.is_network_ready() {
            ConnectionState::AwaitingNetwork
        } else if self.was_online {
            ConnectionState::Disconnected
        } else {
            ConnectionState::ConnectingBroker
        };

        if next != self.state {
            if self.state == ConnectionState::Online {
                warn!("Broker connection lost");
            }
            debug!("Connection state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        if next == ConnectionState::Online {
            self.was_online = true;
        }
    }

    fn handle_restart(&mut self) -> TickOutcome {
        let now = self.clock.now_millis();

        if let Some(deadline) = self.restart_deadline {
            if now < deadline {
                return TickOutcome::Continue;
            }
            info!("Restarting");
            self.device.restart();
            self.restarted = true;
            return TickOutcome::Restarted;
        }

        if self.pending.needs_restart {
            self.pending.needs_restart = false;
            if let Some(topics) = &self.topics {
                Announcer::new(topics).farewell(&mut self.broker, LWT, OFFLINE);
            }
            self.restart_deadline = Some(now.saturating_add(RESTART_SETTLE_MS));
            info!("Restart scheduled in {} ms", RESTART_SETTLE_MS);
        }
        TickOutcome::Continue
    }

    fn restart_pending(&self) -> bool {
        self.pending.needs_restart || self.restart_deadline.is_some()
    }

    /// Validate and persist a portal submission, then schedule a restart.
    pub fn submit_config(&mut self, form: &ConfigForm) -> Result<Configuration, ConfigError> {
        let config = self.gate.submit(form)?.clone();
        self.pending.needs_restart = true;
        info!(device_id = %config.device_id, "Configuration accepted, restart pending");
        Ok(config)
    }

    /// Current values for pre-filling the portal form.
    pub fn portal_form(&self) -> ConfigForm {
        match self.gate.config() {
            Some(config) => config.to_form(),
            None => ConfigForm {
                port: DEFAULT_PORT.to_string(),
                ..Default::default()
            },
        }
    }

    /// Publish under `{prefix}/{device_id}/{sub}`.
    pub fn publish(&mut self, sub: &str, payload: &str, retained: bool, qos: QoS) -> bool {
        let Some(topic) = self.topics.as_ref().map(|t| t.device_topic(sub)) else {
            return false;
        };
        self.publish_raw(&topic, payload, retained, qos)
    }

    /// Publish under `{prefix}/bridge/{sub}`.
    pub fn publish_bridge(&mut self, sub: &str, payload: &str, retained: bool, qos: QoS) -> bool {
        let Some(topic) = self.topics.as_ref().map(|t| t.bridge_topic(sub)) else {
            return false;
        };
        self.publish_raw(&topic, payload, retained, qos)
    }

    fn publish_raw(&mut self, topic: &str, payload: &str, retained: bool, qos: QoS) -> bool {
        if !self.broker.is_connected() {
            debug!("Not connected, dropping publish to {}", topic);
            return false;
        }
        self.broker.publish(topic, payload, retained, qos)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pending(&self) -> PendingActions {
        self.pending
    }

    pub fn gate(&self) -> &ProvisioningGate<S> {
        &self.gate
    }

    pub fn topics(&self) -> Option<&TopicNamer> {
        self.topics.as_ref()
    }

    /// A restart is scheduled or waiting for its settle deadline.
    pub fn is_restart_pending(&self) -> bool {
        self.restart_pending()
    }

    pub fn restart_deadline(&self) -> Option<u64> {
        self.restart_deadline
    }

    pub fn is_restarted(&self) -> bool {
        self.restarted
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Hand the collaborators back, e.g. to boot again on the same storage.
    pub fn into_parts(self) -> (ProvisioningGate<S>, B, N, C, D) {
        (self.gate, self.broker, self.network, self.clock, self.device)
    }
}
