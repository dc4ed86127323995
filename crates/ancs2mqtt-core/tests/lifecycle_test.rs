//! Lifecycle scenarios for the connection supervisor.
//!
//! Every collaborator is scripted and time is a manual clock, so the retry
//! and restart policies run without real waiting.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use ancs2mqtt_core::config::RESET_SELECTED;
use ancs2mqtt_core::{
    BrokerSession, Clock, ConfigError, ConfigForm, ConfigStore, ConnectionState,
    ConnectionSupervisor, Credentials, DeviceControl, ErrorKind, MemoryRegion, NetworkLayer,
    ProvisioningGate, QoS, TickOutcome,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    SetHost(String, u16),
    Will(String, String, bool),
    Connect(String, Option<String>, Option<String>),
    Publish(String, String, bool),
}

#[derive(Default)]
struct ScriptedBroker {
    reachable: bool,
    connected: bool,
    attempts: usize,
    calls: Vec<Call>,
}

impl ScriptedBroker {
    fn reachable() -> Self {
        Self {
            reachable: true,
            ..Default::default()
        }
    }

    fn drop_link(&mut self) {
        self.connected = false;
    }

    fn publishes(&self) -> Vec<(String, String, bool)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Publish(t, p, r) => Some((t.clone(), p.clone(), *r)),
                _ => None,
            })
            .collect()
    }
}

impl BrokerSession for ScriptedBroker {
    fn set_host(&mut self, host: &str, port: u16) {
        self.calls.push(Call::SetHost(host.to_string(), port));
    }

    fn set_last_will(&mut self, topic: &str, payload: &str, retained: bool) {
        self.calls
            .push(Call::Will(topic.to_string(), payload.to_string(), retained));
    }

    fn connect(&mut self, client_id: &str, credentials: Credentials<'_>) -> bool {
        let (user, pass) = match credentials {
            Credentials::Anonymous => (None, None),
            Credentials::User { username } => (Some(username.to_string()), None),
            Credentials::UserPassword { username, password } => {
                (Some(username.to_string()), Some(password.to_string()))
            }
        };
        self.calls.push(Call::Connect(client_id.to_string(), user, pass));
        self.attempts += 1;
        self.connected = self.reachable;
        self.connected
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool, _qos: QoS) -> bool {
        self.calls.push(Call::Publish(
            topic.to_string(),
            payload.to_string(),
            retained,
        ));
        self.connected
    }

    fn advance(&mut self) {}
}

struct ScriptedNetwork {
    ready: bool,
    advances: usize,
}

impl ScriptedNetwork {
    fn up() -> Self {
        Self {
            ready: true,
            advances: 0,
        }
    }
}

impl NetworkLayer for ScriptedNetwork {
    fn is_network_ready(&self) -> bool {
        self.ready
    }

    fn local_ip(&self) -> [u8; 4] {
        [192, 168, 1, 42]
    }

    fn advance(&mut self) {
        self.advances += 1;
    }
}

#[derive(Clone, Default)]
struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.0.get()
    }
}

#[derive(Default)]
struct Device {
    restarts: usize,
}

impl DeviceControl for Device {
    fn restart(&mut self) {
        self.restarts += 1;
    }
}

type Supervisor =
    ConnectionSupervisor<MemoryRegion, ScriptedBroker, ScriptedNetwork, ManualClock, Device>;

fn valid_form() -> ConfigForm {
    ConfigForm {
        host: "mqtt.local".to_string(),
        port: "1883".to_string(),
        device_id: "phone1".to_string(),
        ssid: "HomeNet".to_string(),
        ..Default::default()
    }
}

fn provisioned_region(form: &ConfigForm) -> MemoryRegion {
    let mut store = ConfigStore::new(MemoryRegion::default());
    store.save(form).unwrap();
    store.into_region()
}

fn boot(region: MemoryRegion, broker: ScriptedBroker, clock: &ManualClock) -> Supervisor {
    let gate = ProvisioningGate::evaluate(ConfigStore::new(region));
    ConnectionSupervisor::new(
        "ancs2mqtt",
        gate,
        broker,
        ScriptedNetwork::up(),
        clock.clone(),
        Device::default(),
    )
}

fn tick_for(supervisor: &mut Supervisor, clock: &ManualClock, total_ms: u64, step_ms: u64) {
    let mut elapsed = 0;
    while elapsed < total_ms {
        assert_eq!(supervisor.tick(), TickOutcome::Continue);
        clock.advance(step_ms);
        elapsed += step_ms;
    }
}

#[test]
fn test_fresh_device_provisions_then_restarts() {
    let clock = ManualClock::default();
    let mut supervisor = boot(MemoryRegion::default(), ScriptedBroker::reachable(), &clock);

    assert_eq!(supervisor.state(), ConnectionState::Provisioning);
    tick_for(&mut supervisor, &clock, 3000, 100);
    assert_eq!(supervisor.broker().attempts, 0);
    assert!(!supervisor.pending().needs_broker_connect);

    let mut bad = valid_form();
    bad.host = "mq".to_string();
    match supervisor.submit_config(&bad) {
        Err(ConfigError::Invalid(e)) => assert_eq!(e.kind, ErrorKind::InvalidHost),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!supervisor.pending().needs_restart);

    let saved = supervisor.submit_config(&valid_form()).unwrap();
    assert_eq!(saved.device_id, "phone1");
    assert!(supervisor.pending().needs_restart);

    // Scheduling tick: no link to say goodbye on, deadline set.
    assert_eq!(supervisor.tick(), TickOutcome::Continue);
    assert!(!supervisor.pending().needs_restart);
    let deadline = supervisor.restart_deadline().unwrap();
    assert_eq!(deadline, clock.now_millis() + 1000);

    clock.advance(999);
    assert_eq!(supervisor.tick(), TickOutcome::Continue);
    assert_eq!(supervisor.broker().attempts, 0);
    assert_eq!(supervisor.device().restarts, 0);

    clock.advance(1);
    assert_eq!(supervisor.tick(), TickOutcome::Restarted);
    assert_eq!(supervisor.device().restarts, 1);
    assert_eq!(supervisor.tick(), TickOutcome::Restarted);
    assert_eq!(supervisor.device().restarts, 1);

    // Next boot comes up provisioned from the same storage.
    let (gate, ..) = supervisor.into_parts();
    let region = gate.store().region().clone();
    let supervisor = boot(region, ScriptedBroker::reachable(), &clock);
    assert_eq!(supervisor.gate().config().map(|c| c.host.as_str()), Some("mqtt.local"));
    assert_eq!(supervisor.state(), ConnectionState::AwaitingNetwork);
}

#[test]
fn test_connects_and_announces() {
    let clock = ManualClock::default();
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    let mut supervisor = boot(provisioned_region(&valid_form()), ScriptedBroker::reachable(), &clock)
        .on_started(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    // First tick notices the missing session.
    supervisor.tick();
    assert!(supervisor.pending().needs_broker_connect);
    assert_eq!(supervisor.broker().attempts, 0);
    assert_eq!(supervisor.state(), ConnectionState::ConnectingBroker);

    // Second tick connects.
    clock.advance(100);
    supervisor.tick();
    assert!(!supervisor.pending().needs_broker_connect);
    assert_eq!(supervisor.state(), ConnectionState::Online);
    assert_eq!(started.load(Ordering::SeqCst), 1);

    let calls = &supervisor.broker().calls;
    assert_eq!(calls[0], Call::SetHost("mqtt.local".to_string(), 1883));
    assert_eq!(
        calls[1],
        Call::Will("ancs2mqtt/bridge/LWT".to_string(), "Offline".to_string(), true)
    );
    assert_eq!(calls[2], Call::Connect("ancs2mqtt".to_string(), None, None));

    let published = supervisor.broker().publishes();
    assert_eq!(published.len(), 2);
    assert_eq!(
        published[0],
        ("ancs2mqtt/bridge/LWT".to_string(), "Online".to_string(), true)
    );
    assert_eq!(published[1].0, "ancs2mqtt/bridge/info");
    assert!(!published[1].2);

    let info: serde_json::Value = serde_json::from_str(&published[1].1).unwrap();
    assert_eq!(
        info,
        serde_json::json!({
            "version": "0100",
            "name": "ancs2mqtt",
            "ssid": "HomeNet",
            "ip": "192.168.1.42",
            "device-topic": "ancs2mqtt/phone1/+"
        })
    );

    // Steady state publishes nothing further.
    tick_for(&mut supervisor, &clock, 5000, 100);
    assert_eq!(supervisor.broker().attempts, 1);
    assert_eq!(supervisor.broker().publishes().len(), 2);
}

#[test]
fn test_credentials_follow_configuration() {
    let clock = ManualClock::default();
    let mut form = valid_form();
    form.username = "bob".to_string();
    form.password = "secret".to_string();
    let mut supervisor = boot(provisioned_region(&form), ScriptedBroker::reachable(), &clock);

    supervisor.tick();
    supervisor.tick();
    assert!(supervisor.broker().calls.contains(&Call::Connect(
        "ancs2mqtt".to_string(),
        Some("bob".to_string()),
        Some("secret".to_string())
    )));
}

#[test]
fn test_broker_drop_reconnects_without_refiring_hook() {
    let clock = ManualClock::default();
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    let mut supervisor = boot(provisioned_region(&valid_form()), ScriptedBroker::reachable(), &clock)
        .on_started(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    supervisor.tick();
    supervisor.tick();
    assert_eq!(supervisor.state(), ConnectionState::Online);

    clock.advance(100);
    supervisor.broker_mut().drop_link();
    supervisor.tick();
    assert!(supervisor.pending().needs_broker_connect);
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);

    // Still inside the window of the first attempt.
    supervisor.tick();
    assert_eq!(supervisor.broker().attempts, 1);

    clock.advance(1000);
    supervisor.tick();
    assert_eq!(supervisor.broker().attempts, 2);
    assert_eq!(supervisor.state(), ConnectionState::Online);
    assert!(!supervisor.pending().needs_broker_connect);
    assert_eq!(started.load(Ordering::SeqCst), 1);

    // The will fired in between, so availability is republished.
    let online: Vec<_> = supervisor
        .broker()
        .publishes()
        .into_iter()
        .filter(|(t, p, _)| t == "ancs2mqtt/bridge/LWT" && p == "Online")
        .collect();
    assert_eq!(online.len(), 2);
}

#[test]
fn test_persistent_failure_is_rate_limited() {
    let clock = ManualClock::default();
    let mut supervisor = boot(provisioned_region(&valid_form()), ScriptedBroker::default(), &clock);

    tick_for(&mut supervisor, &clock, 10_000, 100);

    let attempts = supervisor.broker().attempts;
    assert!((9..=11).contains(&attempts), "{} attempts in 10s", attempts);
    assert!(supervisor.pending().needs_broker_connect);
    assert_eq!(supervisor.state(), ConnectionState::ConnectingBroker);
    assert!(supervisor.broker().publishes().is_empty());
}

#[test]
fn test_fast_ticks_do_not_add_attempts() {
    let clock = ManualClock::default();
    let mut supervisor = boot(provisioned_region(&valid_form()), ScriptedBroker::default(), &clock);

    tick_for(&mut supervisor, &clock, 3000, 1);
    let attempts = supervisor.broker().attempts;
    assert!((2..=4).contains(&attempts), "{} attempts in 3s", attempts);
}

#[test]
fn test_waits_for_network() {
    let clock = ManualClock::default();
    let mut supervisor = boot(provisioned_region(&valid_form()), ScriptedBroker::reachable(), &clock);
    supervisor.network_mut().ready = false;

    tick_for(&mut supervisor, &clock, 2000, 100);
    assert_eq!(supervisor.state(), ConnectionState::AwaitingNetwork);
    assert!(!supervisor.pending().needs_broker_connect);
    assert_eq!(supervisor.broker().attempts, 0);
    assert_eq!(supervisor.network().advances, 20);

    supervisor.network_mut().ready = true;
    supervisor.tick();
    supervisor.tick();
    assert_eq!(supervisor.state(), ConnectionState::Online);
}

#[test]
fn test_save_while_online_says_goodbye_before_restart() {
    let clock = ManualClock::default();
    let mut supervisor = boot(provisioned_region(&valid_form()), ScriptedBroker::reachable(), &clock);
    supervisor.tick();
    supervisor.tick();
    assert_eq!(supervisor.state(), ConnectionState::Online);

    let mut changed = valid_form();
    changed.host = "broker.lan".to_string();
    supervisor.submit_config(&changed).unwrap();

    clock.advance(100);
    assert_eq!(supervisor.tick(), TickOutcome::Continue);
    assert_eq!(
        supervisor.broker().publishes().last(),
        Some(&("ancs2mqtt/bridge/LWT".to_string(), "Offline".to_string(), true))
    );

    // No reconnects while the restart settles.
    supervisor.broker_mut().drop_link();
    clock.advance(500);
    assert_eq!(supervisor.tick(), TickOutcome::Continue);
    assert!(!supervisor.pending().needs_broker_connect);
    assert_eq!(supervisor.broker().attempts, 1);

    clock.advance(500);
    assert_eq!(supervisor.tick(), TickOutcome::Restarted);
    assert_eq!(supervisor.device().restarts, 1);
}

#[test]
fn test_reset_requested_at_boot() {
    let clock = ManualClock::default();
    let mut form = valid_form();
    form.reset = RESET_SELECTED.to_string();
    let mut supervisor = boot(provisioned_region(&form), ScriptedBroker::reachable(), &clock);

    assert_eq!(supervisor.tick(), TickOutcome::Restarted);
    assert_eq!(supervisor.device().restarts, 1);
    assert_eq!(supervisor.broker().attempts, 0);
    assert_eq!(supervisor.state(), ConnectionState::Provisioning);
    assert!(supervisor.gate().store().region().bytes().iter().all(|b| *b == 0));
    assert_eq!(supervisor.gate().store().load(), None);

    let (gate, ..) = supervisor.into_parts();
    let supervisor = boot(gate.store().region().clone(), ScriptedBroker::reachable(), &clock);
    assert_eq!(supervisor.state(), ConnectionState::Provisioning);
}

#[test]
fn test_reset_checkbox_applies_on_next_boot() {
    let clock = ManualClock::default();
    let mut supervisor = boot(provisioned_region(&valid_form()), ScriptedBroker::reachable(), &clock);

    let mut form = valid_form();
    form.reset = RESET_SELECTED.to_string();
    supervisor.submit_config(&form).unwrap();

    // This boot restarts normally and keeps the stored bytes.
    assert_eq!(supervisor.tick(), TickOutcome::Continue);
    assert!(supervisor.restart_deadline().is_some());
    clock.advance(1000);
    assert_eq!(supervisor.tick(), TickOutcome::Restarted);
    assert!(supervisor.gate().store().load().is_some());

    // The next one consumes the request.
    let (gate, ..) = supervisor.into_parts();
    let mut supervisor = boot(gate.store().region().clone(), ScriptedBroker::reachable(), &clock);
    assert_eq!(supervisor.tick(), TickOutcome::Restarted);
    assert_eq!(supervisor.gate().store().load(), None);
}

#[test]
fn test_publish_helpers() {
    let clock = ManualClock::default();
    let mut supervisor = boot(provisioned_region(&valid_form()), ScriptedBroker::reachable(), &clock);

    assert!(!supervisor.publish("notification", "{}", false, QoS::AtMostOnce));

    supervisor.tick();
    supervisor.tick();
    assert!(supervisor.publish("notification/added", "{}", false, QoS::AtLeastOnce));
    assert!(supervisor.publish_bridge("state", "Connected", true, QoS::AtMostOnce));

    let published = supervisor.broker().publishes();
    let tail = &published[published.len() - 2..];
    assert_eq!(
        tail,
        &[
            (
                "ancs2mqtt/phone1/notification/added".to_string(),
                "{}".to_string(),
                false
            ),
            (
                "ancs2mqtt/bridge/state".to_string(),
                "Connected".to_string(),
                true
            ),
        ]
    );
}

#[test]
fn test_portal_form_prefill() {
    let clock = ManualClock::default();
    let fresh = boot(MemoryRegion::default(), ScriptedBroker::default(), &clock);
    assert_eq!(fresh.portal_form().port, "1883");
    assert_eq!(fresh.portal_form().host, "");

    let provisioned = boot(provisioned_region(&valid_form()), ScriptedBroker::default(), &clock);
    let form = provisioned.portal_form();
    assert_eq!(form.host, "mqtt.local");
    assert_eq!(form.device_id, "phone1");
    assert_eq!(form.topic_prefix, "ancs2mqtt");
}
