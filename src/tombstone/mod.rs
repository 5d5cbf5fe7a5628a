//! Tombstone Module
//!
//! Durable deletion records attached to a data file.
//!
//! ## Responsibilities
//! - Append one deletion per line, fsync'd before returning
//! - Roll back the most recent record with an `aborted` sentinel
//! - Replay the whole log for read paths and recovery
//!
//! ## File Format (`<datafile>.mods`, UTF-8 text)
//! ```text
//! DELETION,root.sg.d0.s0,17,1000
//! DELETION,root.sg.d0.s1,18,1000
//! aborted
//! ```
//! A record is `TYPE,path,version,timestamp`. A deletion removes every point
//! of `path` with timestamp `<= timestamp` that was written under a version
//! lower than `version`.

mod log;

pub use log::TombstoneLog;

use std::fmt;

use crate::error::{ChronoError, Result};
use crate::schema::{SeriesPath, Timestamp};

const SEPARATOR: char = ',';
const DELETION_TYPE: &str = "DELETION";

/// Delete all points of `path` up to and including `timestamp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub path: SeriesPath,
    pub version: u64,
    pub timestamp: Timestamp,
}

impl Deletion {
    pub fn new(path: SeriesPath, version: u64, timestamp: Timestamp) -> Self {
        Self {
            path,
            version,
            timestamp,
        }
    }

    /// Whether this deletion hides point `t` of `path` written under `data_version`
    pub fn covers(&self, path: &SeriesPath, data_version: u64, t: Timestamp) -> bool {
        self.path == *path && data_version < self.version && t <= self.timestamp
    }
}

/// One record of a tombstone log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    Deletion(Deletion),
}

impl Modification {
    pub fn path(&self) -> &SeriesPath {
        match self {
            Modification::Deletion(d) => &d.path,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Modification::Deletion(d) => d.version,
        }
    }

    /// Encode as one log line (without the trailing newline)
    pub fn encode(&self) -> String {
        match self {
            Modification::Deletion(d) => format!(
                "{}{sep}{}{sep}{}{sep}{}",
                DELETION_TYPE,
                d.path,
                d.version,
                d.timestamp,
                sep = SEPARATOR
            ),
        }
    }

    /// Decode one log line; any malformed field is corruption
    pub fn decode(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        match fields[0] {
            DELETION_TYPE => decode_deletion(&fields).map(Modification::Deletion),
            other => Err(ChronoError::Corruption(format!(
                "Unknown modification type: {:?}",
                other
            ))),
        }
    }
}

impl From<Deletion> for Modification {
    fn from(deletion: Deletion) -> Self {
        Modification::Deletion(deletion)
    }
}

impl fmt::Display for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn decode_deletion(fields: &[&str]) -> Result<Deletion> {
    if fields.len() != 4 {
        return Err(ChronoError::Corruption(format!(
            "Incorrect deletion fields number: {}",
            fields.len()
        )));
    }

    let path: SeriesPath = fields[1].parse()?;
    let version = fields[2].parse::<u64>().map_err(|_| {
        ChronoError::Corruption(format!("Invalid version number: {:?}", fields[2]))
    })?;
    let timestamp = fields[3].parse::<Timestamp>().map_err(|_| {
        ChronoError::Corruption(format!("Invalid timestamp: {:?}", fields[3]))
    })?;

    Ok(Deletion::new(path, version, timestamp))
}
