//! Provisioning gate: AP/portal mode vs. station/online mode.
//!
//! ```text
//!                  save passes validation
//!  NeedsProvisioning ──────────────────────▶ Provisioned
//!          ▲                                     │
//!          └──── reset flag seen at boot ────────┘
//!               (wipe, restart, re-evaluate)
//! ```
//!
//! The gate is evaluated once per boot. Leaving `Provisioned` is only
//! possible through a restart.

use tracing::{error, info, warn};

use crate::announce::{Announcer, DISCONNECTED};
use crate::config::{ConfigForm, Configuration};
use crate::platform::{BrokerSession, DeviceControl};
use crate::store::{ConfigError, ConfigStore, StorageRegion};
use crate::topic::{TopicNamer, STATE};

/// Whether the device has a usable configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Only the provisioning portal runs; no broker connects.
    NeedsProvisioning,
    /// Station mode; the connect policy may run.
    Provisioned,
}

/// Owns the configuration store and decides the operating mode.
#[derive(Debug)]
pub struct ProvisioningGate<S: StorageRegion> {
    store: ConfigStore<S>,
    state: GateState,
    config: Option<Configuration>,
    /// Reset flag as loaded at boot; later submissions do not change it.
    reset_at_boot: bool,
}

impl<S: StorageRegion> ProvisioningGate<S> {
    /// Evaluate the stored configuration for this boot.
    pub fn evaluate(store: ConfigStore<S>) -> Self {
        let config = match store.load() {
            Some(config) => match config.validate() {
                Ok(()) => Some(config),
                Err(e) => {
                    warn!("Stored configuration no longer validates ({}), reprovisioning", e);
                    None
                }
            },
            None => None,
        };

        let state = if config.is_some() {
            GateState::Provisioned
        } else {
            GateState::NeedsProvisioning
        };
        let reset_at_boot = config.as_ref().is_some_and(|c| c.reset_requested);
        info!("Provisioning gate: {:?}", state);

        Self {
            store,
            state,
            config,
            reset_at_boot,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Configuration this boot operates on.
    pub fn config(&self) -> Option<&Configuration> {
        self.config.as_ref()
    }

    /// The configuration loaded at boot asks for a reset.
    pub fn reset_requested(&self) -> bool {
        self.reset_at_boot
    }

    /// Accept a portal submission.
    ///
    /// On success the gate is `Provisioned`; the caller must schedule a
    /// restart because network parameters cannot be swapped in place.
    pub fn submit(&mut self, form: &ConfigForm) -> Result<&Configuration, ConfigError> {
        let config = self.store.save(form)?;
        self.state = GateState::Provisioned;
        Ok(self.config.insert(config))
    }

    /// Consume a pending reset: wipe storage, say goodbye, restart.
    ///
    /// Terminal for the current process.
    pub fn perform_reset<B, D>(&mut self, broker: &mut B, device: &mut D)
    where
        B: BrokerSession,
        D: DeviceControl,
    {
        info!("Clearing configuration storage and starting over");
        let topics = self.config.as_ref().map(TopicNamer::for_config);

        if let Err(e) = self.store.reset() {
            error!("Failed to clear configuration storage, reset stays pending: {}", e);
        }
        self.config = None;
        self.state = GateState::NeedsProvisioning;
        self.reset_at_boot = false;

        if let Some(topics) = topics {
            Announcer::new(&topics).farewell(broker, STATE, DISCONNECTED);
        }
        device.restart();
    }

    pub fn store(&self) -> &ConfigStore<S> {
        &self.store
    }
}
