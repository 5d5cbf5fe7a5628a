//! Storage Module
//!
//! Persistent data files and the flush path that produces them.
//!
//! ## Responsibilities
//! - Write chunk groups and seal files with a footer index
//! - Read sealed files through the footer index
//! - Detect files that crashed before sealing and salvage their valid prefix
//! - Flush memtables through one shared code path

pub(crate) mod codec;
pub mod datafile;
mod flush;

pub use datafile::{
    ChunkGroupMetadata, ChunkMetadata, DataFileReader, DataFileWriter, FileMetadata,
    RestorableWriter, DATA_FILE_EXTENSION,
};
pub use flush::flush_memtable;

use std::path::Path;

use crate::error::Result;

/// Make renames and creations inside `dir` durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directory handles cannot be fsync'd on this platform
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
