//! # ancs2mqtt-core
//!
//! Connectivity supervisor for the ancs2mqtt bridge.
//!
//! This crate provides:
//! - Configuration model, validation and versioned persistence
//! - Topic namespace derivation
//! - The provisioning gate (portal mode vs. online mode)
//! - The connection supervisor with its connect/retry and restart policy
//! - Availability and info announcements
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Radios, sockets, storage and clocks are reached through the traits in
//! [`platform`] and [`store`], so the same supervisor runs on device firmware,
//! on a Linux host and under test.

pub mod announce;
pub mod config;
pub mod platform;
pub mod provisioning;
pub mod store;
pub mod supervisor;
pub mod topic;

pub use announce::{Announcer, BridgeInfo};
pub use config::{validate, ConfigForm, Configuration, Credentials, ErrorKind, ValidationError};
pub use platform::{BrokerSession, Clock, DeviceControl, NetworkLayer, QoS};
pub use provisioning::{GateState, ProvisioningGate};
pub use store::{ConfigError, ConfigStore, MemoryRegion, StorageError, StorageRegion};
pub use supervisor::{ConnectionState, ConnectionSupervisor, PendingActions, TickOutcome};
pub use topic::TopicNamer;
