//! Clock and restart control for a host process.

use std::time::Instant;

use ancs2mqtt_core::{Clock, DeviceControl};
use tracing::info;

/// Milliseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Restart by re-booting the supervisor inside the same process.
///
/// The runner notices the restart through the tick outcome and builds a new
/// supervisor from storage; this only records the request.
#[derive(Debug, Default)]
pub struct SoftRestart {
    requests: usize,
}

impl SoftRestart {
    pub fn requests(&self) -> usize {
        self.requests
    }
}

impl DeviceControl for SoftRestart {
    fn restart(&mut self) {
        self.requests += 1;
        info!("Restart requested, rebooting supervisor");
    }
}
