//! Persistent configuration storage.
//!
//! The configuration lives in a fixed-size reserved region (flash, EEPROM or a
//! file on a host). Layout:
//!
//! ```text
//! [0..4)   version tag, ASCII (CONFIG_VERSION)
//! [4..6)   body length, little-endian u16
//! [6..)    JSON body, then zero padding to the end of the region
//! ```
//!
//! Anything that does not decode cleanly under the current tag is treated as
//! absent, which sends the device back into provisioning.

use crate::config::{validate, ConfigForm, Configuration, ValidationError, CONFIG_VERSION};
use tracing::{debug, info, warn};

/// Size of the reserved configuration region in bytes.
pub const REGION_SIZE: usize = 512;

const TAG_LEN: usize = 4;
const HEADER_LEN: usize = TAG_LEN + 2;

/// Errors from the underlying storage primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O failed: {0}")]
    Io(String),

    #[error("Encoded configuration needs {needed} bytes, region holds {capacity}")]
    TooLarge { needed: usize, capacity: usize },
}

/// Errors from [`ConfigStore::save`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A raw, fixed-size persistent byte region.
///
/// Implementations provide the platform primitive (EEPROM emulation, NVS
/// blob, a file on Linux). `write` always receives exactly `capacity()` bytes.
pub trait StorageRegion {
    /// Size of the region in bytes.
    fn capacity(&self) -> usize;

    /// Read the whole region.
    fn read(&self) -> Result<Vec<u8>, StorageError>;

    /// Overwrite the whole region.
    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError>;
}

/// In-memory region, used by tests and as a volatile fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    bytes: Vec<u8>,
}

impl MemoryRegion {
    /// A zeroed region of the given size.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MemoryRegion {
    fn default() -> Self {
        Self::new(REGION_SIZE)
    }
}

impl StorageRegion for MemoryRegion {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self) -> Result<Vec<u8>, StorageError> {
        Ok(self.bytes.clone())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if bytes.len() != self.bytes.len() {
            return Err(StorageError::Io(format!(
                "expected {} bytes, got {}",
                self.bytes.len(),
                bytes.len()
            )));
        }
        self.bytes.copy_from_slice(bytes);
        Ok(())
    }
}

/// Outcome of decoding a stored region.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Nothing stored (zeroed region).
    Empty,
    /// Written under a different layout version.
    ForeignVersion(String),
    /// Correct tag but the body is unusable.
    Corrupt(String),
    Config(Configuration),
}

/// Encode a configuration into a full region image.
pub fn encode(config: &Configuration, capacity: usize) -> Result<Vec<u8>, StorageError> {
    let body = serde_json::to_vec(config).map_err(|e| StorageError::Io(e.to_string()))?;
    let needed = HEADER_LEN + body.len();
    if needed > capacity || body.len() > u16::MAX as usize {
        return Err(StorageError::TooLarge { needed, capacity });
    }

    let mut image = vec![0u8; capacity];
    image[..TAG_LEN].copy_from_slice(CONFIG_VERSION.as_bytes());
    image[TAG_LEN..HEADER_LEN].copy_from_slice(&(body.len() as u16).to_le_bytes());
    image[HEADER_LEN..needed].copy_from_slice(&body);
    Ok(image)
}

/// Decode a region image.
pub fn decode(image: &[u8]) -> Decoded {
    if image.iter().all(|b| *b == 0) {
        return Decoded::Empty;
    }
    if image.len() < HEADER_LEN {
        return Decoded::Corrupt("region shorter than header".to_string());
    }

    let tag = &image[..TAG_LEN];
    if tag != CONFIG_VERSION.as_bytes() {
        return Decoded::ForeignVersion(String::from_utf8_lossy(tag).into_owned());
    }

    let len = u16::from_le_bytes([image[TAG_LEN], image[TAG_LEN + 1]]) as usize;
    let Some(body) = image.get(HEADER_LEN..HEADER_LEN + len) else {
        return Decoded::Corrupt(format!("body length {} exceeds region", len));
    };

    match serde_json::from_slice::<Configuration>(body) {
        Ok(config) => Decoded::Config(config),
        Err(e) => Decoded::Corrupt(e.to_string()),
    }
}

/// Validated configuration storage on top of a [`StorageRegion`].
#[derive(Debug)]
pub struct ConfigStore<S: StorageRegion> {
    region: S,
}

impl<S: StorageRegion> ConfigStore<S> {
    pub fn new(region: S) -> Self {
        Self { region }
    }

    /// Load the stored configuration.
    ///
    /// Returns `None` for an empty region, a foreign layout version, a
    /// malformed body or a read failure.
    pub fn load(&self) -> Option<Configuration> {
        let image = match self.region.read() {
            Ok(image) => image,
            Err(e) => {
                warn!("Configuration storage unreadable: {}", e);
                return None;
            }
        };

        match decode(&image) {
            Decoded::Empty => {
                debug!("No stored configuration");
                None
            }
            Decoded::ForeignVersion(tag) => {
                warn!(
                    "Stored configuration has version {:?}, expected {:?}; ignoring it",
                    tag, CONFIG_VERSION
                );
                None
            }
            Decoded::Corrupt(reason) => {
                warn!("Stored configuration is corrupt: {}", reason);
                None
            }
            Decoded::Config(config) => Some(config),
        }
    }

    /// Validate a submission and persist it.
    ///
    /// Nothing is written unless validation passes.
    pub fn save(&mut self, form: &ConfigForm) -> Result<Configuration, ConfigError> {
        let config = validate(form)?;
        let image = encode(&config, self.region.capacity())?;
        self.region.write(&image)?;
        info!(
            host = %config.host,
            port = config.port,
            device_id = %config.device_id,
            "Configuration saved"
        );
        Ok(config)
    }

    /// Zero the entire region, not just the bytes the current layout uses.
    pub fn reset(&mut self) -> Result<(), StorageError> {
        let zeroes = vec![0u8; self.region.capacity()];
        self.region.write(&zeroes)?;
        info!("Configuration storage cleared");
        Ok(())
    }

    pub fn region(&self) -> &S {
        &self.region
    }

    pub fn into_region(self) -> S {
        self.region
    }
}
