//! Engine Module
//!
//! The storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Recover every data file on startup, in parallel
//! - Route inserts to the sequence or unsequence working file
//! - Log every write to the WAL before it reaches a memtable
//! - Record deletions as tombstones on every file that may hold the series
//! - Seal working files and serve sealed ones to queries
//! - Refuse to remove files that live queries still read

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ChronoError, Result};
use crate::memtable::{MemTable, ReadOnlyMemChunk};
use crate::query::{FileReferenceCounter, JobId, QueryFileTracker};
use crate::recovery::{log_node_identifier, FileRecoverPerformer, RecoveryState};
use crate::resource::FileResource;
use crate::schema::{DataType, FileSchema, SchemaLog, SeriesPath, Timestamp, Value};
use crate::storage::{
    flush_memtable, sync_dir, DataFileReader, DataFileWriter, DATA_FILE_EXTENSION,
};
use crate::tombstone::{Deletion, Modification, TombstoneLog};
use crate::version::{FileVersionController, VersionController};
use crate::wal::{DeleteRecord, InsertRecord, LogNode, LogNodeManager, Operation};

/// Sequence files hold in-order data, unsequence files take late arrivals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Sequence,
    Unsequence,
}

impl FileKind {
    /// Prefix of the log node identifiers of this kind's files
    pub fn log_node_prefix(self) -> &'static str {
        match self {
            FileKind::Sequence => "seq-",
            FileKind::Unsequence => "unseq-",
        }
    }

    fn accepts_duplication(self) -> bool {
        matches!(self, FileKind::Unsequence)
    }
}

/// A sealed file served to queries
#[derive(Debug, Clone)]
struct SealedFile {
    kind: FileKind,
    resource: Arc<FileResource>,
}

/// The file currently taking writes for one kind
struct WorkingFile {
    kind: FileKind,
    resource: FileResource,
    memtable: Arc<MemTable>,
    writer: DataFileWriter,
    log_node: Arc<LogNode>,
}

impl WorkingFile {
    /// Write the memtable into the file as new chunk groups without sealing
    ///
    /// Returns the latest flushed timestamp of every flushed device.
    fn flush_memtable(
        &mut self,
        versions: &dyn VersionController,
    ) -> Result<Vec<(String, Timestamp)>> {
        if self.memtable.is_empty() {
            return Ok(Vec::new());
        }

        self.log_node.notify_start_flush()?;
        let groups = flush_memtable(&self.memtable, &mut self.writer, versions)?;
        self.memtable.clear();
        self.log_node.notify_end_flush()?;

        Ok(groups
            .iter()
            .filter_map(|g| g.time_range().map(|(_, end)| (g.device.clone(), end)))
            .collect())
    }

    /// Flush what is left and write the footer
    ///
    /// On failure the file keeps serving reads from its memtable and
    /// flushed chunks; the next startup recovers it from disk and WAL.
    fn seal(&mut self, versions: &dyn VersionController, schema: &FileSchema) -> Result<()> {
        self.flush_memtable(versions)?;
        self.writer.end_file(schema)?;
        Ok(())
    }

    /// Turn a file whose footer is on disk into a sealed file, persisting its
    /// resource and dropping its WAL
    ///
    /// The sealed file is returned even if persisting fails: its data is
    /// already sealed on disk and startup rebuilds a missing resource.
    fn into_sealed(self, log_nodes: &LogNodeManager) -> (SealedFile, Result<()>) {
        let WorkingFile {
            kind,
            mut resource,
            log_node,
            ..
        } = self;
        let persisted = resource
            .serialize()
            .and_then(|()| log_nodes.delete_node(log_node.identifier()));
        let closed = resource.close();

        match &persisted {
            Ok(()) => info!(file = %resource.file().display(), ?kind, "sealed data file"),
            Err(e) => error!(
                file = %resource.file().display(),
                ?kind,
                error = %e,
                "sealed data file but failed to persist its resource"
            ),
        }
        let sealed = SealedFile {
            kind,
            resource: Arc::new(resource),
        };
        (sealed, persisted.and(closed))
    }

    /// Transient resource carrying everything a query may read from this
    /// file for one series
    fn query_snapshot(&self, path: &SeriesPath, data_type: DataType) -> FileResource {
        let chunk = self
            .memtable
            .query(&path.device, &path.measurement)
            .unwrap_or_else(|| ReadOnlyMemChunk {
                measurement: path.measurement.clone(),
                data_type,
                points: Vec::new(),
            });
        let chunk_metadata = self
            .writer
            .chunk_groups()
            .iter()
            .filter(|g| g.device == path.device)
            .flat_map(|g| g.chunks.iter())
            .filter(|c| c.measurement == path.measurement)
            .cloned()
            .collect();

        FileResource::query_snapshot(
            self.resource.file(),
            self.resource.start_times().clone(),
            self.resource.end_times().clone(),
            chunk,
            chunk_metadata,
        )
    }
}

/// Mutable write-side state, guarded by one lock
#[derive(Default)]
struct WorkingSet {
    sequence: Option<WorkingFile>,
    unsequence: Option<WorkingFile>,
    /// Files whose writer failed; still read and deleted from, recovered on
    /// the next startup
    retired: Vec<WorkingFile>,
    /// device → latest timestamp flushed into a sequence file
    latest_flushed: HashMap<String, Timestamp>,
}

impl WorkingSet {
    fn slot(&mut self, kind: FileKind) -> &mut Option<WorkingFile> {
        match kind {
            FileKind::Sequence => &mut self.sequence,
            FileKind::Unsequence => &mut self.unsequence,
        }
    }

    fn files(&self) -> impl Iterator<Item = &WorkingFile> {
        self.sequence
            .iter()
            .chain(self.unsequence.iter())
            .chain(self.retired.iter())
    }

    /// Stop writing to the working file of `kind` if its writer gave up
    fn retire_if_broken(&mut self, kind: FileKind) {
        let broken = self
            .slot(kind)
            .as_ref()
            .map_or(false, |f| f.writer.is_finished());
        if !broken {
            return;
        }
        if let Some(file) = self.slot(kind).take() {
            warn!(file = %file.resource.file().display(), ?kind, "retiring working file after a write failure");
            self.retired.push(file);
        }
    }

    fn note_flushed<'a>(&mut self, ends: impl IntoIterator<Item = (&'a String, &'a Timestamp)>) {
        for (device, end) in ends {
            let latest = self
                .latest_flushed
                .entry(device.clone())
                .or_insert(Timestamp::MIN);
            *latest = (*latest).max(*end);
        }
    }
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (insert/delete/flush): serialized by the `working` lock,
///   which also guards routing state
/// - **Queries**: take the `working` lock, then the `sealed` read lock, only
///   long enough to register their files and snapshot unflushed data; file
///   reads happen without engine locks
/// - Lock order is always `working` before `sealed`
/// - **File removal**: takes the `sealed` write lock, so no query can
///   register a file between the reference check and the removal
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Versions ordering flushes and tombstones
    versions: FileVersionController,

    /// WAL of every working file
    log_nodes: LogNodeManager,

    /// Registered measurements
    schema: RwLock<FileSchema>,
    schema_log: SchemaLog,

    /// Sealed files, oldest first
    sealed: RwLock<Vec<SealedFile>>,

    /// Working files and routing state
    working: Mutex<WorkingSet>,

    /// Files read by in-flight queries
    tracker: QueryFileTracker,
    references: Arc<FileReferenceCounter>,

    /// Id of the next data file
    next_file_id: AtomicU64,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const VERSION_DIR: &'static str = "version";
    const RECOVERING_SUFFIX: &'static str = ".recovering";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the directory layout
    /// 2. Restore the version counter and the schema
    /// 3. Recover every data file (fails startup if any file fails)
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Directory layout
        let sequence_dir = config.sequence_dir();
        let unsequence_dir = config.unsequence_dir();
        let system_dir = config.system_dir();
        for dir in [&sequence_dir, &unsequence_dir, &system_dir] {
            fs::create_dir_all(dir)?;
        }

        // Step 2: Versions, schema, WAL registry
        let versions = FileVersionController::with_save_interval(
            system_dir.join(Self::VERSION_DIR),
            config.version_save_interval,
        )?;
        let schema_log = SchemaLog::open(&system_dir);
        let schema = schema_log.load()?;
        let log_nodes = LogNodeManager::new(config.wal_dir(), config.wal_sync_strategy)?;

        // Step 3: Recover data files
        let mut pending = Vec::new();
        let mut known_nodes = HashSet::new();
        let mut max_id = None;
        for (kind, dir) in [
            (FileKind::Sequence, &sequence_dir),
            (FileKind::Unsequence, &unsequence_dir),
        ] {
            for path in Self::list_data_files(dir)? {
                if let Some(id) = file_id(&path) {
                    max_id = max_id.max(Some(id));
                }
                known_nodes.insert(log_node_identifier(kind.log_node_prefix(), &path));
                pending.push((kind, path));
            }
        }

        let recovered = recover_files(
            config.recovery_threads,
            &schema,
            &versions,
            &log_nodes,
            pending,
        )?;
        Self::remove_orphan_log_nodes(&log_nodes, &known_nodes)?;

        let mut working = WorkingSet::default();
        for file in &recovered {
            if file.kind == FileKind::Sequence {
                working.note_flushed(file.resource.end_times());
            }
        }

        info!(
            data_dir = %config.data_dir.display(),
            files = recovered.len(),
            measurements = schema.len(),
            version = versions.curr_version(),
            "engine opened"
        );

        let references = Arc::new(FileReferenceCounter::new());
        Ok(Self {
            config,
            versions,
            log_nodes,
            schema: RwLock::new(schema),
            schema_log,
            sealed: RwLock::new(recovered),
            working: Mutex::new(working),
            tracker: QueryFileTracker::new(Arc::clone(&references)),
            references,
            next_file_id: AtomicU64::new(max_id.map_or(0, |id| id + 1)),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Declare the type of a measurement; re-registering the same type is a
    /// no-op
    pub fn register_measurement(&self, measurement: &str, data_type: DataType) -> Result<()> {
        let mut schema = self.schema.write();
        match schema.data_type(measurement) {
            Some(existing) if existing == data_type => return Ok(()),
            Some(existing) => {
                return Err(ChronoError::TypeMismatch {
                    measurement: measurement.to_string(),
                    expected: existing.to_string(),
                    value: data_type.to_string(),
                })
            }
            None => {}
        }
        self.schema_log.append(measurement, data_type)?;
        schema.register(measurement, data_type);
        debug!(measurement, %data_type, "registered measurement");
        Ok(())
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Insert one row
    ///
    /// Steps:
    /// 1. Type the values against the schema
    /// 2. Route by the device's latest flushed sequence time
    /// 3. Write to the working file's WAL
    /// 4. Write to its memtable and resource
    /// 5. Flush the memtable if it is full
    pub fn insert(&self, record: InsertRecord) -> Result<()> {
        if record.measurements.len() != record.values.len() {
            return Err(ChronoError::Storage(format!(
                "row of {} has {} measurements but {} values",
                record.device,
                record.measurements.len(),
                record.values.len()
            )));
        }

        let row = {
            let schema = self.schema.read();
            record
                .measurements
                .iter()
                .zip(&record.values)
                .map(|(measurement, raw)| -> Result<(String, Value)> {
                    let data_type = schema
                        .data_type(measurement)
                        .ok_or_else(|| ChronoError::UnknownMeasurement(measurement.clone()))?;
                    Ok((measurement.clone(), Value::parse(measurement, data_type, raw)?))
                })
                .collect::<Result<Vec<_>>>()?
        };

        let device = record.device.clone();
        let timestamp = record.timestamp;

        let mut working = self.working.lock();
        let kind = match working.latest_flushed.get(&device) {
            Some(latest) if timestamp <= *latest => FileKind::Unsequence,
            _ => FileKind::Sequence,
        };

        let file = self.working_file(&mut working, kind)?;
        file.log_node.write(Operation::Insert(record))?;
        file.memtable.insert(&device, timestamp, &row)?;
        // Rows arrive out of order in both kinds of file
        file.resource.update_start_time(&device, timestamp);
        file.resource.update_end_time(&device, timestamp);

        if file.memtable.should_flush(self.config.memtable_size_limit) {
            debug!(?kind, size = file.memtable.size(), "memtable full, flushing");
            let flushed = match file.flush_memtable(&self.versions) {
                Ok(flushed) => flushed,
                Err(e) => {
                    working.retire_if_broken(kind);
                    return Err(e);
                }
            };
            if kind == FileKind::Sequence {
                working.note_flushed(flushed.iter().map(|(d, t)| (d, t)));
            }
        }
        Ok(())
    }

    /// Delete every point of `paths` with `t <= upper_bound`
    ///
    /// All tombstones of one call share a version. Every path is checked
    /// before anything is written. If a tombstone cannot be written, the ones
    /// already written are cancelled with abort markers and the error is
    /// returned. The WAL record is written only after every tombstone is
    /// durable, so a cancelled delete is never replayed.
    pub fn delete(&self, paths: &[SeriesPath], upper_bound: Timestamp) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        for path in paths {
            TombstoneLog::ensure_storable(path)?;
        }

        let working = self.working.lock();
        let version = self.versions.next_version()?;
        let sealed = self.sealed.read();
        let targets = sealed
            .iter()
            .map(|f| f.resource.as_ref())
            .chain(working.files().map(|f| &f.resource));

        let mut written: Vec<Arc<TombstoneLog>> = Vec::new();
        for resource in targets {
            let affected = paths
                .iter()
                .filter(|p| resource.contains_device(&p.device));
            for path in affected {
                let log = resource.get_or_create_tombstone_log();
                let deletion = Modification::from(Deletion::new(path.clone(), version, upper_bound));
                if let Err(e) = log.write(&deletion) {
                    error!(file = %resource.file().display(), error = %e, "tombstone write failed, rolling back");
                    Self::rollback_tombstones(&written);
                    return Err(e);
                }
                written.push(log);
            }
        }

        let record = DeleteRecord::new(paths.to_vec(), upper_bound);
        for file in working.files() {
            if let Err(e) = file.log_node.write(Operation::Delete(record.clone())) {
                error!(node = file.log_node.identifier(), error = %e, "WAL delete failed, rolling back");
                Self::rollback_tombstones(&written);
                return Err(e);
            }
        }

        let mut removed = 0;
        for file in working.files() {
            for path in paths {
                removed += file.memtable.delete(&path.device, &path.measurement, upper_bound);
            }
        }

        debug!(
            paths = paths.len(),
            upper_bound,
            version,
            tombstones = written.len(),
            buffered_removed = removed,
            "deleted"
        );
        Ok(())
    }

    /// Seal every working file
    ///
    /// A file stays the working file until its footer is written, so a
    /// failed flush loses no visibility of acknowledged rows. Once the
    /// footer is on disk the file is served as sealed even if its resource
    /// cannot be persisted.
    pub fn flush(&self) -> Result<()> {
        let mut working = self.working.lock();
        let schema = self.schema.read().clone();

        for kind in [FileKind::Sequence, FileKind::Unsequence] {
            let outcome = match working.slot(kind).as_mut() {
                Some(file) => {
                    let outcome = file.seal(&self.versions, &schema);
                    if let Err(e) = &outcome {
                        error!(file = %file.resource.file().display(), ?kind, error = %e, "failed to seal working file");
                    }
                    outcome
                }
                None => continue,
            };
            if let Err(e) = outcome {
                working.retire_if_broken(kind);
                return Err(e);
            }

            let Some(file) = working.slot(kind).take() else {
                continue;
            };
            let (sealed, persisted) = file.into_sealed(&self.log_nodes);
            if kind == FileKind::Sequence {
                working.note_flushed(sealed.resource.end_times());
            }
            self.sealed.write().push(sealed);
            persisted?;
        }
        Ok(())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Start a query job; its files stay referenced until [`end_query`](Self::end_query)
    pub fn begin_query(&self) -> JobId {
        self.tracker.allocate_job()
    }

    /// Points of `path` within `[lower, upper]`, ordered by time
    ///
    /// Sealed files, flushed chunks of working files and unflushed memtable
    /// data are merged; tombstones hide points of chunks flushed before them
    /// and a newer flush wins at equal timestamps.
    pub fn query(
        &self,
        job: JobId,
        path: &SeriesPath,
        lower: Timestamp,
        upper: Timestamp,
    ) -> Result<Vec<(Timestamp, Value)>> {
        let data_type = self
            .schema
            .read()
            .data_type(&path.measurement)
            .ok_or_else(|| ChronoError::UnknownMeasurement(path.measurement.clone()))?;
        if lower > upper {
            return Ok(Vec::new());
        }

        // Both locks at once: a file sealed in between must not be missed
        let (sealed, unsealed) = {
            let working = self.working.lock();
            let sealed_files = self.sealed.read();

            let sealed: Vec<Arc<FileResource>> = sealed_files
                .iter()
                .filter(|f| f.resource.might_contain(&path.device, lower, upper))
                .map(|f| {
                    self.tracker.register_usage(job, f.resource.file(), true);
                    Arc::clone(&f.resource)
                })
                .collect();
            let unsealed: Vec<FileResource> = working
                .files()
                .filter(|f| f.resource.might_contain(&path.device, lower, upper))
                .map(|f| {
                    self.tracker.register_usage(job, f.resource.file(), false);
                    f.query_snapshot(path, data_type)
                })
                .collect();
            (sealed, unsealed)
        };

        let mut merged = SeriesMerge::new(path, lower, upper);
        for resource in &sealed {
            merged.set_deletions(resource)?;
            let mut reader = DataFileReader::open(resource.file())?;
            for (version, points) in reader.read_series(&path.device, &path.measurement)? {
                merged.add(version, points);
            }
        }
        for snapshot in &unsealed {
            merged.set_deletions(snapshot)?;
            for chunk in snapshot.chunk_metadata().unwrap_or_default() {
                let points = DataFileReader::read_unsealed_chunk(snapshot.file(), chunk)?;
                merged.add(chunk.version, points);
            }
            if let Some(chunk) = snapshot.read_only_chunk() {
                // Unflushed points are newer than every flush and tombstone
                merged.add(u64::MAX, chunk.points.clone());
            }
        }

        Ok(merged.finish())
    }

    /// Release every file referenced by `job`
    pub fn end_query(&self, job: JobId) {
        self.tracker.end_job(job);
    }

    // =========================================================================
    // Compaction Contract
    // =========================================================================

    /// Permanently remove a sealed file with its resource and tombstone log
    ///
    /// Fails with [`ChronoError::FileInUse`] while any query references it.
    pub fn remove_sealed_file(&self, file: &Path) -> Result<()> {
        let removed = {
            let mut sealed = self.sealed.write();
            if self.references.is_referenced(file) {
                return Err(ChronoError::FileInUse(file.to_path_buf()));
            }
            let position = sealed
                .iter()
                .position(|f| f.resource.file() == file)
                .ok_or_else(|| {
                    ChronoError::Storage(format!("{} is not a sealed data file", file.display()))
                })?;
            sealed.remove(position)
        };

        removed.resource.get_or_create_tombstone_log().close()?;
        for path in [
            removed.resource.resource_path(),
            TombstoneLog::companion_path(file),
            file.to_path_buf(),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(file = %file.display(), kind = ?removed.kind, "removed sealed file");
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Seals working files and syncs every log node
    pub fn close(self) -> Result<()> {
        self.flush()?;
        self.log_nodes.close()?;
        info!(version = self.versions.curr_version(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Paths of the sealed files, oldest first
    pub fn sealed_files(&self) -> Vec<PathBuf> {
        self.sealed
            .read()
            .iter()
            .map(|f| f.resource.file().to_path_buf())
            .collect()
    }

    /// Paths of the sealed files of one kind
    pub fn sealed_files_of(&self, kind: FileKind) -> Vec<PathBuf> {
        self.sealed
            .read()
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| f.resource.file().to_path_buf())
            .collect()
    }

    /// Path of the working file of one kind, if any
    pub fn working_file_path(&self, kind: FileKind) -> Option<PathBuf> {
        let mut working = self.working.lock();
        working
            .slot(kind)
            .as_ref()
            .map(|f| f.resource.file().to_path_buf())
    }

    /// Copy of the registered schema
    pub fn schema(&self) -> FileSchema {
        self.schema.read().clone()
    }

    pub fn version_controller(&self) -> &FileVersionController {
        &self.versions
    }

    pub fn reference_counter(&self) -> &Arc<FileReferenceCounter> {
        &self.references
    }

    pub fn query_tracker(&self) -> &QueryFileTracker {
        &self.tracker
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn working_file<'w>(
        &self,
        working: &'w mut WorkingSet,
        kind: FileKind,
    ) -> Result<&'w mut WorkingFile> {
        let slot = working.slot(kind);
        if slot.is_none() {
            *slot = Some(self.create_working_file(kind)?);
        }
        slot.as_mut()
            .ok_or_else(|| ChronoError::Storage("working file unavailable".to_string()))
    }

    fn create_working_file(&self, kind: FileKind) -> Result<WorkingFile> {
        let dir = match kind {
            FileKind::Sequence => self.config.sequence_dir(),
            FileKind::Unsequence => self.config.unsequence_dir(),
        };
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{:06}.{}", id, DATA_FILE_EXTENSION));

        // The file must be on disk before its WAL holds anything
        let mut writer = DataFileWriter::create(&path)?;
        writer.sync()?;
        sync_dir(&dir)?;

        let memtable = Arc::new(MemTable::new());
        let resource = FileResource::unsealed(&path, Arc::clone(&memtable));
        let log_node = self
            .log_nodes
            .get_node(&log_node_identifier(kind.log_node_prefix(), &path))?;

        debug!(file = %path.display(), ?kind, "opened working file");
        Ok(WorkingFile {
            kind,
            resource,
            memtable,
            writer,
            log_node,
        })
    }

    /// Delete log nodes whose data file is gone; their rows have nowhere to
    /// be replayed
    fn remove_orphan_log_nodes(log_nodes: &LogNodeManager, known: &HashSet<String>) -> Result<()> {
        for identifier in log_nodes.node_identifiers()? {
            if known.contains(&identifier) {
                continue;
            }
            warn!(node = %identifier, "removing log node without a data file");
            log_nodes.delete_node(&identifier)?;
        }
        Ok(())
    }

    /// Cancel already written tombstones, newest first
    fn rollback_tombstones(written: &[Arc<TombstoneLog>]) {
        for log in written.iter().rev() {
            if let Err(e) = log.abort() {
                error!(log = %log.path().display(), error = %e, "failed to abort tombstone");
            }
        }
    }

    /// Data files of one directory, ordered by file id; leftovers of an
    /// interrupted recovery are removed
    fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.to_string_lossy().ends_with(Self::RECOVERING_SUFFIX) {
                warn!(file = %path.display(), "removing leftover of an interrupted recovery");
                fs::remove_file(&path)?;
                continue;
            }
            if path.extension().map_or(false, |ext| ext == DATA_FILE_EXTENSION) {
                files.push(path);
            }
        }
        files.sort_by_key(|path| (file_id(path), path.clone()));
        Ok(files)
    }
}

// =============================================================================
// Startup Recovery
// =============================================================================

/// Recover `pending` files on up to `threads` workers
///
/// Every file is attempted; the first failure is returned after all workers
/// finish.
fn recover_files(
    threads: usize,
    schema: &FileSchema,
    versions: &dyn VersionController,
    log_nodes: &LogNodeManager,
    pending: Vec<(FileKind, PathBuf)>,
) -> Result<Vec<SealedFile>> {
    if pending.is_empty() {
        return Ok(Vec::new());
    }

    let workers = threads.clamp(1, pending.len());
    let (task_tx, task_rx) = channel::unbounded::<(FileKind, PathBuf)>();
    let (done_tx, done_rx) = channel::unbounded::<Result<Option<SealedFile>>>();
    for task in pending {
        task_tx
            .send(task)
            .map_err(|_| ChronoError::Storage("recovery queue closed".to_string()))?;
    }
    drop(task_tx);

    info!(workers, "recovering data files");
    crossbeam::thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move |_| {
                for (kind, path) in task_rx.iter() {
                    let outcome = recover_one(kind, path, schema, versions, log_nodes);
                    if done_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
    })
    .map_err(|_| ChronoError::Storage("recovery worker panicked".to_string()))?;
    drop(done_tx);

    let mut recovered = Vec::new();
    let mut first_error = None;
    for outcome in done_rx.iter() {
        match outcome {
            Ok(Some(file)) => recovered.push(file),
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "data file recovery failed");
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    recovered.sort_by_key(|f| (file_id(f.resource.file()), f.resource.file().to_path_buf()));
    Ok(recovered)
}

fn recover_one(
    kind: FileKind,
    path: PathBuf,
    schema: &FileSchema,
    versions: &dyn VersionController,
    log_nodes: &LogNodeManager,
) -> Result<Option<SealedFile>> {
    let mut resource = FileResource::new(path);
    let performer = FileRecoverPerformer::new(
        kind.log_node_prefix(),
        schema,
        versions,
        log_nodes,
        kind.accepts_duplication(),
    );
    match performer.recover(&mut resource)? {
        RecoveryState::Missing => Ok(None),
        _ => Ok(Some(SealedFile {
            kind,
            resource: Arc::new(resource),
        })),
    }
}

/// Numeric id from a `<id>.tsfile` name
fn file_id(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

// =============================================================================
// Query Merge
// =============================================================================

/// Accumulates points of one series from several sources
struct SeriesMerge<'p> {
    path: &'p SeriesPath,
    lower: Timestamp,
    upper: Timestamp,
    /// Deletions of the source currently being added
    deletions: Vec<Deletion>,
    /// timestamp → (version of the source chunk, value)
    points: BTreeMap<Timestamp, (u64, Value)>,
}

impl<'p> SeriesMerge<'p> {
    fn new(path: &'p SeriesPath, lower: Timestamp, upper: Timestamp) -> Self {
        Self {
            path,
            lower,
            upper,
            deletions: Vec::new(),
            points: BTreeMap::new(),
        }
    }

    /// Load the deletions recorded for the series in `resource`'s file
    fn set_deletions(&mut self, resource: &FileResource) -> Result<()> {
        let path = self.path;
        self.deletions = resource
            .get_or_create_tombstone_log()
            .read()?
            .into_iter()
            .filter_map(|m| match m {
                Modification::Deletion(d) if d.path == *path => Some(d),
                _ => None,
            })
            .collect();
        Ok(())
    }

    fn add(&mut self, version: u64, points: Vec<(Timestamp, Value)>) {
        for (t, value) in points {
            if t < self.lower || t > self.upper {
                continue;
            }
            if self.deletions.iter().any(|d| d.covers(self.path, version, t)) {
                continue;
            }
            match self.points.get(&t) {
                Some((existing, _)) if *existing > version => {}
                _ => {
                    self.points.insert(t, (version, value));
                }
            }
        }
    }

    fn finish(self) -> Vec<(Timestamp, Value)> {
        self.points.into_iter().map(|(t, (_, v))| (t, v)).collect()
    }
}
