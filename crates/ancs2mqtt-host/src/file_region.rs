//! File-backed configuration region.
//!
//! Stands in for the device's EEPROM: a single file of exactly `capacity`
//! bytes. A missing file reads as a zeroed region, and writes go through a
//! temporary file plus rename so a crash never leaves a half-written image.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ancs2mqtt_core::{StorageError, StorageRegion};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FileRegion {
    path: PathBuf,
    capacity: usize,
}

impl FileRegion {
    /// Use `path` as a region of `capacity` bytes, creating parent
    /// directories as needed. The file itself is created on first write.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!("{}: {}", parent.display(), e))
            })?;
        }
        debug!("Configuration region at {}", path.display());
        Ok(Self { path, capacity })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageRegion for FileRegion {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> Result<Vec<u8>, StorageError> {
        let mut bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StorageError::Io(format!("{}: {}", self.path.display(), e))),
        };
        bytes.resize(self.capacity, 0);
        Ok(bytes)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if bytes.len() != self.capacity {
            return Err(StorageError::Io(format!(
                "expected {} bytes, got {}",
                self.capacity,
                bytes.len()
            )));
        }

        let staging = self.path.with_extension("tmp");
        fs::write(&staging, bytes)
            .and_then(|()| fs::rename(&staging, &self.path))
            .map_err(|e| StorageError::Io(format!("{}: {}", self.path.display(), e)))
    }
}
