//! MemTable Flush
//!
//! The single path that turns buffered points into chunk groups. Used by the
//! engine when sealing a working file and by recovery when writing replayed
//! data into a crashed file.

use tracing::debug;

use crate::error::Result;
use crate::memtable::MemTable;
use crate::version::VersionController;

use super::datafile::{ChunkGroupMetadata, DataFileWriter};

/// Write every device of `memtable` as one chunk group, all under one newly
/// issued version, then sync the writer
///
/// The memtable is left untouched; callers clear it once the file is sealed.
pub fn flush_memtable(
    memtable: &MemTable,
    writer: &mut DataFileWriter,
    versions: &dyn VersionController,
) -> Result<Vec<ChunkGroupMetadata>> {
    let snapshot = memtable.snapshot();
    if snapshot.is_empty() {
        return Ok(Vec::new());
    }

    let version = versions.next_version()?;
    let mut groups = Vec::with_capacity(snapshot.len());
    for (device, chunks) in &snapshot {
        if let Some(group) = writer.write_chunk_group(device, version, chunks)? {
            groups.push(group);
        }
    }
    writer.sync()?;

    debug!(
        file = %writer.path().display(),
        version,
        chunk_groups = groups.len(),
        "flushed memtable"
    );
    Ok(groups)
}
