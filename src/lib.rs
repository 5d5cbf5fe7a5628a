//! # ChronoDB
//!
//! The on-disk storage core of a time-series database:
//! - Per-file device time ranges (resource index) for query planning
//! - Durable monotonic versions ordering flushes and tombstones
//! - Append-only tombstone logs with an abort marker for rollback
//! - Crash recovery by replaying per-file write-ahead logs
//! - Reference counting of files read by in-flight queries
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │        (routing, delete rollback, sealing, queries)         │
//! └──────┬──────────────┬───────────────┬───────────────┬───────┘
//!        │              │               │               │
//!        ▼              ▼               ▼               ▼
//!  ┌───────────┐  ┌───────────┐  ┌─────────────┐  ┌───────────┐
//!  │    WAL    │  │ MemTable  │  │  Data Files │  │   Query   │
//!  │ log nodes │  │ (RwLock)  │  │ + .resource │  │  Tracker  │
//!  └─────┬─────┘  └───────────┘  │ + .mods     │  └───────────┘
//!        │                       └──────▲──────┘
//!        ▼                              │
//!  ┌─────────────────────────────────────┴───────┐
//!  │   Recovery: replayer + per-file performer   │
//!  │          (versions, tombstones)             │
//!  └─────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod schema;

pub mod memtable;
pub mod query;
pub mod recovery;
pub mod resource;
pub mod storage;
pub mod tombstone;
pub mod version;
pub mod wal;

pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, WalSyncStrategy};
pub use engine::{Engine, FileKind};
pub use error::{ChronoError, Result};
pub use resource::FileResource;
pub use schema::{DataType, SeriesPath, Timestamp, Value};
pub use version::{FileVersionController, VersionController};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ChronoDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
