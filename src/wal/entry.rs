//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use serde::{Deserialize, Serialize};

use crate::error::{ChronoError, Result};
use crate::schema::{SeriesPath, Timestamp};

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest payload a frame may declare
pub(crate) const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing within a log node
    pub lsn: u64,

    /// The operation to redo
    pub operation: Operation,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Insert one row of a device
    Insert(InsertRecord),

    /// Delete points up to a bound for several series
    Delete(DeleteRecord),

    /// Legacy in-place update; never replayed
    Update(UpdateRecord),
}

/// One row: several measurements of a device at one timestamp.
/// Values are textual and typed by the schema when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRecord {
    pub device: String,
    pub timestamp: Timestamp,
    pub measurements: Vec<String>,
    pub values: Vec<String>,
}

impl InsertRecord {
    pub fn new(
        device: impl Into<String>,
        timestamp: Timestamp,
        measurements: Vec<String>,
        values: Vec<String>,
    ) -> Self {
        Self {
            device: device.into(),
            timestamp,
            measurements,
            values,
        }
    }

    /// Single-measurement row
    pub fn single(
        device: impl Into<String>,
        timestamp: Timestamp,
        measurement: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(
            device,
            timestamp,
            vec![measurement.into()],
            vec![value.into()],
        )
    }
}

/// Delete every point with `t <= upper_bound` of each path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRecord {
    pub paths: Vec<SeriesPath>,
    pub upper_bound: Timestamp,
}

impl DeleteRecord {
    pub fn new(paths: Vec<SeriesPath>, upper_bound: Timestamp) -> Self {
        Self { paths, upper_bound }
    }
}

/// Overwrite the values of a series within `[start, end]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub path: SeriesPath,
    pub start: Timestamp,
    pub end: Timestamp,
    pub value: String,
}

impl WalEntry {
    pub fn new(lsn: u64, operation: Operation) -> Self {
        Self { lsn, operation }
    }

    /// Frame the entry: `[lsn: u64][crc: u32][len: u32][bincode(operation)]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&self.operation)?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD)
            .ok_or_else(|| {
                ChronoError::Serialization(format!("WAL payload too large: {}", payload.len()))
            })?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&self.lsn.to_le_bytes());
        frame.extend_from_slice(&Self::compute_crc(self.lsn, &payload).to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Rebuild an entry from a verified frame header and its payload
    pub fn deserialize(lsn: u64, crc: u32, payload: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(lsn, payload);
        if actual != crc {
            return Err(ChronoError::Corruption(format!(
                "WAL checksum mismatch at lsn {}: expected {}, got {}",
                lsn, crc, actual
            )));
        }
        let operation = bincode::deserialize(payload)?;
        Ok(Self { lsn, operation })
    }

    /// CRC32 over the LSN and payload
    pub fn compute_crc(lsn: u64, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }
}
