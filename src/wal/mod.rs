//! Write-Ahead Log (WAL) Module
//!
//! Provides durability for buffered writes until they are flushed into a
//! data file.
//!
//! ## Responsibilities
//! - Append insert and delete operations before they touch a memtable
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering
//! - Per-data-file log nodes that roll and shrink around flushes
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! Integers are little-endian, `Data` is the bincode encoding of an
//! [`Operation`] and the CRC covers the LSN and `Data`.

mod entry;
mod node;
mod reader;
mod writer;

pub use entry::{DeleteRecord, InsertRecord, Operation, UpdateRecord, WalEntry, HEADER_SIZE};
pub use node::{LogNode, LogNodeManager};
pub use reader::{WalIterator, WalReader};
pub use writer::WalWriter;
