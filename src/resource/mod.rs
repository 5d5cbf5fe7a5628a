//! Resource Index Module
//!
//! Per-file device time ranges, persisted in a companion `.resource` file so
//! query planning can skip files without matching data.
//!
//! ## Resource File Format (`<datafile>.resource`, big-endian)
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ countStart: i32                              │
//! │ countStart × [device: string][start: i64]    │
//! ├──────────────────────────────────────────────┤
//! │ countEnd: i32                                │
//! │ countEnd × [device: string][end: i64]        │
//! └──────────────────────────────────────────────┘
//! string = [len: i32][UTF-8 bytes]
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use byteorder::{BigEndian, WriteBytesExt};
use tracing::{debug, warn};

use crate::error::{ChronoError, Result};
use crate::memtable::{MemTable, ReadOnlyMemChunk};
use crate::schema::Timestamp;
use crate::storage::codec::{read_count, read_i64, read_string, write_string};
use crate::storage::datafile::ChunkMetadata;
use crate::storage::sync_dir;
use crate::tombstone::TombstoneLog;

/// Time-range summary and handles of one data file
///
/// ## Concurrency:
/// - Time maps are mutated only by the single writer that owns an unsealed
///   file (`&mut self`); once closed they are never mutated again
/// - The tombstone log is created at most once (`OnceLock`) and shared
pub struct FileResource {
    /// Path of the data file
    file: PathBuf,

    /// device → earliest timestamp
    start_times: BTreeMap<String, Timestamp>,

    /// device → latest timestamp
    end_times: BTreeMap<String, Timestamp>,

    /// Sealed: no more writes, time maps frozen
    closed: bool,

    /// Working memtable of the writer, present only while unsealed
    working_memtable: Option<Arc<MemTable>>,

    /// Tombstone log, created on first access
    tombstones: OnceLock<Arc<TombstoneLog>>,

    /// Chunk metadata of an unsealed file, set only on query snapshots
    chunk_metadata: Option<Vec<ChunkMetadata>>,

    /// Unflushed data, set only on query snapshots
    read_only_chunk: Option<ReadOnlyMemChunk>,
}

impl FileResource {
    /// Suffix of the companion resource file
    pub const RESOURCE_SUFFIX: &'static str = ".resource";

    /// Empty, unsealed resource with no writer (used by recovery)
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            start_times: BTreeMap::new(),
            end_times: BTreeMap::new(),
            closed: false,
            working_memtable: None,
            tombstones: OnceLock::new(),
            chunk_metadata: None,
            read_only_chunk: None,
        }
    }

    /// Empty resource for a file just opened for writing
    pub fn unsealed(file: impl Into<PathBuf>, memtable: Arc<MemTable>) -> Self {
        let mut resource = Self::new(file);
        resource.working_memtable = Some(memtable);
        resource
    }

    /// Sealed resource with known time ranges
    pub fn with_times(
        file: impl Into<PathBuf>,
        start_times: BTreeMap<String, Timestamp>,
        end_times: BTreeMap<String, Timestamp>,
    ) -> Self {
        let mut resource = Self::new(file);
        resource.start_times = start_times;
        resource.end_times = end_times;
        resource.closed = true;
        resource
    }

    /// Transient view of an unsealed file handed to a single query
    pub fn query_snapshot(
        file: impl Into<PathBuf>,
        start_times: BTreeMap<String, Timestamp>,
        end_times: BTreeMap<String, Timestamp>,
        read_only_chunk: ReadOnlyMemChunk,
        chunk_metadata: Vec<ChunkMetadata>,
    ) -> Self {
        let mut resource = Self::new(file);
        resource.start_times = start_times;
        resource.end_times = end_times;
        resource.read_only_chunk = Some(read_only_chunk);
        resource.chunk_metadata = Some(chunk_metadata);
        resource
    }

    // =========================================================================
    // Time Range Maintenance
    // =========================================================================

    /// `start[device] = min(start[device], time)`
    pub fn update_start_time(&mut self, device: &str, time: Timestamp) {
        if self.reject_if_closed(device) {
            return;
        }
        let start = self.start_times.get(device).copied().unwrap_or(Timestamp::MAX);
        if time < start {
            self.start_times.insert(device.to_string(), time);
        }
    }

    /// `end[device] = max(end[device], time)`
    pub fn update_end_time(&mut self, device: &str, time: Timestamp) {
        if self.reject_if_closed(device) {
            return;
        }
        let end = self.end_times.get(device).copied().unwrap_or(Timestamp::MIN);
        if time > end {
            self.end_times.insert(device.to_string(), time);
        }
    }

    /// Record `time` for `device`: the start is only set when absent, the end
    /// is raised when `time` is larger
    pub fn update_time(&mut self, device: &str, time: Timestamp) {
        if self.reject_if_closed(device) {
            return;
        }
        self.start_times.entry(device.to_string()).or_insert(time);
        match self.end_times.get_mut(device) {
            Some(end) if *end >= time => {}
            Some(end) => *end = time,
            None => {
                self.end_times.insert(device.to_string(), time);
            }
        }
    }

    /// Overwrite the end time regardless of the current value
    pub fn force_update_end_time(&mut self, device: &str, time: Timestamp) {
        if self.reject_if_closed(device) {
            return;
        }
        self.end_times.insert(device.to_string(), time);
    }

    fn reject_if_closed(&self, device: &str) -> bool {
        if self.closed {
            warn!(
                file = %self.file.display(),
                device,
                "ignoring time update on a sealed resource"
            );
        }
        self.closed
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Path of the companion resource file
    pub fn resource_path(&self) -> PathBuf {
        let mut name = self.file.as_os_str().to_owned();
        name.push(Self::RESOURCE_SUFFIX);
        PathBuf::from(name)
    }

    /// Whether the companion resource file exists
    pub fn file_exists(&self) -> bool {
        self.resource_path().exists()
    }

    /// Write both time maps to `<file>.resource`
    ///
    /// The content is written to a temporary sibling, fsync'd, then renamed
    /// over the companion file so readers never observe a partial index.
    pub fn serialize(&self) -> Result<()> {
        let target = self.resource_path();
        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            Self::write_map(&mut writer, &self.start_times)?;
            Self::write_map(&mut writer, &self.end_times)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| ChronoError::Storage(format!("Failed to flush resource: {}", e)))?
                .sync_all()?;
        }

        fs::rename(&tmp, &target)?;
        if let Some(parent) = target.parent() {
            sync_dir(parent)?;
        }

        debug!(
            file = %self.file.display(),
            devices = self.start_times.len(),
            "serialized resource"
        );
        Ok(())
    }

    /// Load both time maps from `<file>.resource`
    ///
    /// Fails if the file is absent, truncated, carries a negative count or has
    /// trailing bytes; the in-memory maps are left untouched on failure.
    pub fn deserialize(&mut self) -> Result<()> {
        let mut bytes = Vec::new();
        File::open(self.resource_path())?.read_to_end(&mut bytes)?;

        let mut cursor = Cursor::new(bytes.as_slice());
        let start_times = Self::read_map(&mut cursor)?;
        let end_times = Self::read_map(&mut cursor)?;

        if (cursor.position() as usize) != bytes.len() {
            return Err(ChronoError::Corruption(format!(
                "{}: {} trailing bytes after resource maps",
                self.resource_path().display(),
                bytes.len() - cursor.position() as usize
            )));
        }

        self.start_times = start_times;
        self.end_times = end_times;
        Ok(())
    }

    fn write_map<W: Write>(writer: &mut W, map: &BTreeMap<String, Timestamp>) -> Result<()> {
        let count = i32::try_from(map.len())
            .map_err(|_| ChronoError::Storage(format!("Too many devices: {}", map.len())))?;
        writer.write_i32::<BigEndian>(count)?;
        for (device, time) in map {
            write_string(writer, device)?;
            writer.write_i64::<BigEndian>(*time)?;
        }
        Ok(())
    }

    fn read_map<R: Read>(reader: &mut R) -> Result<BTreeMap<String, Timestamp>> {
        let count = read_count(reader)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let device = read_string(reader)?;
            let time = read_i64(reader)?;
            map.insert(device, time);
        }
        Ok(map)
    }

    // =========================================================================
    // Handles and Lifecycle
    // =========================================================================

    /// Shared tombstone log of this file, created on first call
    pub fn get_or_create_tombstone_log(&self) -> Arc<TombstoneLog> {
        Arc::clone(
            self.tombstones
                .get_or_init(|| Arc::new(TombstoneLog::for_data_file(&self.file))),
        )
    }

    /// Seal the resource: release the tombstone handle, drop the writer and
    /// any query-only fields
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        if let Some(log) = self.tombstones.get() {
            log.close()?;
        }
        self.working_memtable = None;
        self.chunk_metadata = None;
        self.read_only_chunk = None;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Current on-disk size of the data file (0 if missing)
    pub fn file_size(&self) -> u64 {
        fs::metadata(&self.file).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn contains_device(&self, device: &str) -> bool {
        self.start_times.contains_key(device)
    }

    pub fn start_time(&self, device: &str) -> Option<Timestamp> {
        self.start_times.get(device).copied()
    }

    pub fn end_time(&self, device: &str) -> Option<Timestamp> {
        self.end_times.get(device).copied()
    }

    pub fn start_times(&self) -> &BTreeMap<String, Timestamp> {
        &self.start_times
    }

    pub fn end_times(&self) -> &BTreeMap<String, Timestamp> {
        &self.end_times
    }

    /// Quick check if `device` may have data in `[lower, upper]`.
    /// Returns false only if the device is definitely absent from that range.
    /// A device with a start but no end (unsealed) is treated as open-ended.
    pub fn might_contain(&self, device: &str, lower: Timestamp, upper: Timestamp) -> bool {
        match self.start_times.get(device) {
            None => false,
            Some(&start) => {
                let end = self.end_times.get(device).copied().unwrap_or(Timestamp::MAX);
                start <= upper && end >= lower
            }
        }
    }

    /// Working memtable of the writer, if still unsealed
    pub fn unsealed_memtable(&self) -> Option<&Arc<MemTable>> {
        self.working_memtable.as_ref()
    }

    /// Chunk metadata of a query snapshot
    pub fn chunk_metadata(&self) -> Option<&[ChunkMetadata]> {
        self.chunk_metadata.as_deref()
    }

    /// Unflushed data of a query snapshot
    pub fn read_only_chunk(&self) -> Option<&ReadOnlyMemChunk> {
        self.read_only_chunk.as_ref()
    }
}

impl std::fmt::Debug for FileResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileResource")
            .field("file", &self.file)
            .field("closed", &self.closed)
            .field("start_times", &self.start_times)
            .field("end_times", &self.end_times)
            .finish()
    }
}
