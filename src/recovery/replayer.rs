//! WAL Replayer
//!
//! Redoes the logged operations of one data file into a scratch memtable.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{ChronoError, Result};
use crate::memtable::MemTable;
use crate::resource::FileResource;
use crate::schema::{FileSchema, Timestamp, Value};
use crate::tombstone::{Deletion, Modification, TombstoneLog};
use crate::version::VersionController;
use crate::wal::{DeleteRecord, InsertRecord, LogNodeManager, Operation, WalReader};

/// Counters describing one replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Rows applied to the memtable
    pub inserts_applied: u64,
    /// Rows already persisted in the data file
    pub inserts_skipped: u64,
    /// Tombstones re-emitted
    pub deletions: u64,
}

/// Identifier of the log node protecting `data_file`
pub fn log_node_identifier(log_node_prefix: &str, data_file: &Path) -> String {
    let name = data_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}{}", log_node_prefix, name)
}

/// Replays the log node of one data file
///
/// Time ranges of replayed rows are collected aside and merged into the
/// resource only once the whole log has been read, so a failed replay leaves
/// the resource untouched.
pub struct LogReplayer<'a> {
    log_nodes: &'a LogNodeManager,
    log_node_prefix: &'a str,
    resource: &'a mut FileResource,
    tombstones: Arc<TombstoneLog>,
    versions: &'a dyn VersionController,
    schema: &'a FileSchema,
    memtable: &'a MemTable,
    /// Unsequenced files take rows older than what is already persisted
    accept_duplication: bool,
    temp_start_times: BTreeMap<String, Timestamp>,
    temp_end_times: BTreeMap<String, Timestamp>,
    stats: ReplayStats,
}

impl<'a> LogReplayer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log_nodes: &'a LogNodeManager,
        log_node_prefix: &'a str,
        resource: &'a mut FileResource,
        versions: &'a dyn VersionController,
        schema: &'a FileSchema,
        memtable: &'a MemTable,
        accept_duplication: bool,
    ) -> Self {
        let tombstones = resource.get_or_create_tombstone_log();
        Self {
            log_nodes,
            log_node_prefix,
            resource,
            tombstones,
            versions,
            schema,
            memtable,
            accept_duplication,
            temp_start_times: BTreeMap::new(),
            temp_end_times: BTreeMap::new(),
            stats: ReplayStats::default(),
        }
    }

    /// Read the file's log node to the end, applying every entry
    pub fn replay_logs(mut self) -> Result<ReplayStats> {
        let identifier = log_node_identifier(self.log_node_prefix, self.resource.file());
        let node = self.log_nodes.get_node(&identifier)?;
        let mut reader = node.reader()?;

        let replayed = self.apply_all(&identifier, &mut reader);
        reader.close();
        replayed?;

        for (device, time) in &self.temp_start_times {
            self.resource.update_start_time(device, *time);
        }
        for (device, time) in &self.temp_end_times {
            self.resource.update_end_time(device, *time);
        }

        debug!(
            node = %identifier,
            applied = self.stats.inserts_applied,
            skipped = self.stats.inserts_skipped,
            deletions = self.stats.deletions,
            "replayed log node"
        );
        Ok(self.stats)
    }

    // =========================================================================
    // Operation Handlers
    // =========================================================================

    fn apply_all(&mut self, identifier: &str, reader: &mut WalReader) -> Result<()> {
        while let Some(entry) = reader.next_entry()? {
            trace!(node = identifier, lsn = entry.lsn, "replaying WAL entry");
            match entry.operation {
                Operation::Insert(record) => self.replay_insert(record)?,
                Operation::Delete(record) => self.replay_delete(record)?,
                Operation::Update(_) => return Err(ChronoError::NotImplemented("WAL update replay")),
            }
        }
        Ok(())
    }

    fn replay_insert(&mut self, record: InsertRecord) -> Result<()> {
        let InsertRecord {
            device,
            timestamp,
            measurements,
            values,
        } = record;

        if let Some(last_end) = self.resource.end_time(&device) {
            if last_end >= timestamp && !self.accept_duplication {
                self.stats.inserts_skipped += 1;
                trace!(%device, timestamp, last_end, "skipping row already persisted");
                return Ok(());
            }
        }

        if measurements.len() != values.len() {
            return Err(ChronoError::Corruption(format!(
                "insert into {} at {} has {} measurements but {} values",
                device,
                timestamp,
                measurements.len(),
                values.len()
            )));
        }

        let mut row = Vec::with_capacity(measurements.len());
        for (measurement, raw) in measurements.into_iter().zip(values.iter()) {
            let data_type = self
                .schema
                .data_type(&measurement)
                .ok_or_else(|| ChronoError::UnknownMeasurement(measurement.clone()))?;
            let value = Value::parse(&measurement, data_type, raw)?;
            row.push((measurement, value));
        }

        self.temp_start_times
            .entry(device.clone())
            .and_modify(|start| *start = (*start).min(timestamp))
            .or_insert(timestamp);
        self.temp_end_times
            .entry(device.clone())
            .and_modify(|end| *end = (*end).max(timestamp))
            .or_insert(timestamp);

        self.memtable.insert(&device, timestamp, &row)?;
        self.stats.inserts_applied += 1;
        Ok(())
    }

    fn replay_delete(&mut self, record: DeleteRecord) -> Result<()> {
        for path in record.paths {
            self.memtable
                .delete(&path.device, &path.measurement, record.upper_bound);
            let version = self.versions.next_version()?;
            let deletion = Modification::from(Deletion::new(path, version, record.upper_bound));
            self.tombstones.write(&deletion)?;
            self.stats.deletions += 1;
        }
        Ok(())
    }
}
