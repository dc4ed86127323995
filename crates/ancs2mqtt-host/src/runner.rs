//! The supervisor loop for a host process.
//!
//! Runs on a blocking thread: rumqttc's blocking client drives its own
//! event loop and must not be polled from inside an async task. Between
//! ticks the loop answers queued portal requests. A device restart becomes
//! a fresh boot from storage within the same process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ancs2mqtt_core::store::REGION_SIZE;
use ancs2mqtt_core::{
    BrokerSession, Clock, ConfigStore, ConnectionSupervisor, DeviceControl, NetworkLayer,
    ProvisioningGate, StorageError, StorageRegion, TickOutcome,
};
use tracing::{debug, info};

use crate::portal::PortalInbox;
use crate::{BridgeSettings, FileRegion, HostNetwork, MonotonicClock, RumqttSession, SoftRestart};

pub type HostSupervisor =
    ConnectionSupervisor<FileRegion, RumqttSession, HostNetwork, MonotonicClock, SoftRestart>;

/// Build a supervisor from the stored configuration.
pub fn boot(settings: &BridgeSettings) -> Result<HostSupervisor, StorageError> {
    let region = FileRegion::open(&settings.storage_path, REGION_SIZE)?;
    let gate = ProvisioningGate::evaluate(ConfigStore::new(region));
    let name = settings.name.clone();

    let supervisor = ConnectionSupervisor::new(
        settings.name.clone(),
        gate,
        RumqttSession::new(settings.connect_timeout(), settings.keep_alive()),
        HostNetwork::new(settings.route_probe),
        MonotonicClock::new(),
        SoftRestart::default(),
    )
    .on_started(move || info!("{} is up", name));

    Ok(supervisor)
}

/// Boot and tick until `shutdown` is raised, re-booting after every restart.
pub fn run(
    settings: &BridgeSettings,
    inbox: &mut PortalInbox,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    run_with(
        || boot(settings),
        inbox,
        settings.tick_interval(),
        settings.reboot_pause(),
        shutdown,
    )
}

/// The re-boot loop behind [`run`], over any way of booting a supervisor.
///
/// Each restart is followed by `reboot_pause` before the next boot, so a
/// restart that keeps recurring (a reset that cannot clear storage) does
/// not spin.
pub fn run_with<F, E, S, B, N, C, D>(
    mut boot: F,
    inbox: &mut PortalInbox,
    interval: Duration,
    reboot_pause: Duration,
    shutdown: &AtomicBool,
) -> anyhow::Result<()>
where
    F: FnMut() -> Result<ConnectionSupervisor<S, B, N, C, D>, E>,
    E: std::error::Error + Send + Sync + 'static,
    S: StorageRegion,
    B: BrokerSession,
    N: NetworkLayer,
    C: Clock,
    D: DeviceControl,
{
    let mut boots: u32 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let mut supervisor = boot()?;
        boots += 1;
        info!(boot = boots, state = ?supervisor.state(), "Supervisor booted");

        match drive(&mut supervisor, inbox, interval, shutdown) {
            TickOutcome::Restarted => {
                drop(supervisor);
                debug!("Next boot in {:?}", reboot_pause);
                pause(reboot_pause, interval, shutdown);
            }
            TickOutcome::Continue => break,
        }
    }

    info!("Supervisor loop stopped");
    Ok(())
}

/// Tick one supervisor until it restarts or `shutdown` is raised.
pub fn drive<S, B, N, C, D>(
    supervisor: &mut ConnectionSupervisor<S, B, N, C, D>,
    inbox: &mut PortalInbox,
    interval: Duration,
    shutdown: &AtomicBool,
) -> TickOutcome
where
    S: StorageRegion,
    B: BrokerSession,
    N: NetworkLayer,
    C: Clock,
    D: DeviceControl,
{
    while !shutdown.load(Ordering::Relaxed) {
        inbox.serve_pending(supervisor);
        if supervisor.tick() == TickOutcome::Restarted {
            return TickOutcome::Restarted;
        }
        std::thread::sleep(interval);
    }
    TickOutcome::Continue
}

/// Sleep for `total` in slices of `slice`, returning early on shutdown.
fn pause(total: Duration, slice: Duration, shutdown: &AtomicBool) {
    let until = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        let left = until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        std::thread::sleep(left.min(slice.max(Duration::from_millis(1))));
    }
}
