//! Database metadata record
//!
//! One metadata record per database, persisted next to the epoch
//! directories. The record is serialized as JSON and framed the same way
//! as log records, with a trailing checksum so a torn write is detected
//! on load:
//!
//! - length: u32 LE (4 bytes)
//! - payload: [u8; length] (JSON document)
//! - crc: u32 LE (4 bytes, CRC32 of length + payload)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration record of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Directory holding the metadata file and epoch directories
    pub path: PathBuf,
    /// Nanoseconds represented by one point
    pub resolution: i64,
    /// Nanoseconds before data is purged by retention
    pub retention: i64,
    /// Nanoseconds covered by one epoch
    pub duration: i64,
    /// Bytes per payload
    pub payload_size: u32,
    /// Rows per block store segment
    pub segment_size: u32,
    /// Capacity of the read-only epoch cache
    pub max_ro_epochs: u32,
    /// Capacity of the read-write epoch cache
    pub max_rw_epochs: u32,
}

impl Metadata {
    /// Validates the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.resolution <= 0 {
            return Err(Error::Config("resolution must be positive".to_string()));
        }
        if self.duration <= 0 {
            return Err(Error::Config("duration must be positive".to_string()));
        }
        if self.duration % self.resolution != 0 {
            return Err(Error::Config(
                "duration must be a multiple of resolution".to_string(),
            ));
        }
        if self.retention < 0 {
            return Err(Error::Config("retention must not be negative".to_string()));
        }
        if self.payload_size == 0 {
            return Err(Error::Config("payload size must be positive".to_string()));
        }
        if self.segment_size == 0 {
            return Err(Error::Config("segment size must be positive".to_string()));
        }
        if self.max_ro_epochs == 0 || self.max_rw_epochs == 0 {
            return Err(Error::Config(
                "epoch cache capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Positions held by one epoch.
    pub fn points_per_epoch(&self) -> u32 {
        (self.duration / self.resolution) as u32
    }
}

/// Save / load helper for the metadata file.
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// Creates a store for the metadata file at `path`.
    pub fn new(path: PathBuf) -> Self {
        MetadataStore { path }
    }

    /// Persists the record, replacing any previous one.
    pub fn save(&self, metadata: &Metadata) -> Result<()> {
        let payload = serde_json::to_vec(metadata)?;
        let len_bytes = (payload.len() as u32).to_le_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_bytes);
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut buf = Vec::with_capacity(payload.len() + 8);
        buf.extend_from_slice(&len_bytes);
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&crc.to_le_bytes());

        std::fs::write(&self.path, &buf)?;
        Ok(())
    }

    /// Loads and verifies the record.
    pub fn load(&self) -> Result<Metadata> {
        let data = std::fs::read(&self.path)?;
        if data.len() < 8 {
            return Err(Error::CorruptLog("metadata record too short".to_string()));
        }

        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < len + 8 {
            return Err(Error::CorruptLog(format!(
                "metadata record of {} bytes in a {} byte file",
                len,
                data.len()
            )));
        }

        let payload = &data[4..4 + len];
        let stored_crc =
            u32::from_le_bytes([data[4 + len], data[5 + len], data[6 + len], data[7 + len]]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[0..4]);
        hasher.update(payload);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(Error::CorruptLog(format!(
                "metadata checksum mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        Ok(serde_json::from_slice(payload)?)
    }
}
