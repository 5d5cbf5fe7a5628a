//! Error types for ChronoDB
//!
//! Provides a unified error type for all storage-core operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using ChronoError
pub type Result<T> = std::result::Result<T, ChronoError>;

/// Unified error type for ChronoDB operations
#[derive(Debug, Error)]
pub enum ChronoError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Format / Decode Errors
    // -------------------------------------------------------------------------
    /// A persisted artifact (tombstone log, resource file, data file, WAL
    /// frame) could not be decoded. The whole read is abandoned.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Schema Errors
    // -------------------------------------------------------------------------
    #[error("Unknown measurement: {0}")]
    UnknownMeasurement(String),

    #[error("Type mismatch for {measurement}: cannot parse {value:?} as {expected}")]
    TypeMismatch {
        measurement: String,
        expected: String,
        value: String,
    },

    // -------------------------------------------------------------------------
    // Logical Fatal Conditions
    // -------------------------------------------------------------------------
    #[error("Operation not implemented: {0}")]
    NotImplemented(&'static str),

    /// Wraps any failure raised while recovering a single data file.
    #[error("Recovery of {} failed: {source}", file.display())]
    Recovery {
        file: PathBuf,
        #[source]
        source: Box<ChronoError>,
    },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("File is referenced by a running query: {}", .0.display())]
    FileInUse(PathBuf),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChronoError {
    /// Wrap an error raised during recovery of `file`.
    pub fn recovery(file: impl Into<PathBuf>, source: ChronoError) -> Self {
        match source {
            // Already attributed to a file; keep the innermost attribution.
            err @ ChronoError::Recovery { .. } => err,
            other => ChronoError::Recovery {
                file: file.into(),
                source: Box::new(other),
            },
        }
    }
}

impl From<bincode::Error> for ChronoError {
    fn from(err: bincode::Error) -> Self {
        ChronoError::Serialization(err.to_string())
    }
}
