//! WAL Log Nodes
//!
//! A log node is the WAL of one working data file: a directory of numbered
//! log files. Flushing rolls the node onto a new file so the entries covered
//! by the flush can be dropped once it finishes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::WalSyncStrategy;
use crate::error::{ChronoError, Result};

use super::{Operation, WalReader, WalWriter};

const LOG_FILE_PREFIX: &str = "wal-";
const LOG_FILE_SUFFIX: &str = ".log";

struct NodeState {
    /// Ids of the log files on disk, ascending
    file_ids: Vec<u64>,
    /// Writer of the newest file, opened lazily
    writer: Option<WalWriter>,
    last_lsn: u64,
    /// Files older than this id are covered by an in-progress flush
    flushing_below: Option<u64>,
}

/// WAL of one working data file
pub struct LogNode {
    identifier: String,
    dir: PathBuf,
    sync_strategy: WalSyncStrategy,
    state: Mutex<NodeState>,
}

impl LogNode {
    fn open(dir: PathBuf, identifier: String, sync_strategy: WalSyncStrategy) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let file_ids = list_file_ids(&dir)?;

        // Continue the LSN sequence of a node left behind by a previous run
        let last_lsn = if file_ids.is_empty() {
            0
        } else {
            let paths = file_ids.iter().map(|id| file_path(&dir, *id)).collect();
            let mut reader = WalReader::open_files(paths)?;
            while reader.next_entry()?.is_some() {}
            reader.last_lsn()
        };

        debug!(node = %identifier, files = file_ids.len(), last_lsn, "opened log node");
        Ok(Self {
            identifier,
            dir,
            sync_strategy,
            state: Mutex::new(NodeState {
                file_ids,
                writer: None,
                last_lsn,
                flushing_below: None,
            }),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append an operation, returning its LSN
    pub fn write(&self, operation: Operation) -> Result<u64> {
        let mut state = self.state.lock();
        if state.writer.is_none() {
            let id = match state.file_ids.last() {
                Some(id) if state.flushing_below.map_or(true, |below| *id >= below) => *id,
                Some(id) => *id + 1,
                None => 0,
            };
            if state.file_ids.last() != Some(&id) {
                state.file_ids.push(id);
            }
            let writer = WalWriter::open(&file_path(&self.dir, id), state.last_lsn, self.sync_strategy)?;
            state.writer = Some(writer);
        }

        let lsn = match state.writer.as_mut() {
            Some(writer) => writer.append(operation)?,
            None => return Err(ChronoError::Storage("log node has no writer".into())),
        };
        state.last_lsn = lsn;
        Ok(lsn)
    }

    /// fsync buffered entries
    pub fn force_sync(&self) -> Result<()> {
        if let Some(writer) = self.state.lock().writer.as_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    /// A flush of everything logged so far has started: later entries go to
    /// a new file
    pub fn notify_start_flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(mut writer) = state.writer.take() {
            writer.sync()?;
        }
        let next_id = state.file_ids.last().map_or(0, |id| id + 1);
        state.flushing_below = Some(next_id);
        debug!(node = %self.identifier, next_file = next_id, "log node rolled for flush");
        Ok(())
    }

    /// The flush started by [`notify_start_flush`](Self::notify_start_flush)
    /// is durable: drop the files it covered
    pub fn notify_end_flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(below) = state.flushing_below.take() else {
            warn!(node = %self.identifier, "end of flush without a matching start");
            return Ok(());
        };

        let (obsolete, kept): (Vec<u64>, Vec<u64>) =
            state.file_ids.iter().partition(|id| **id < below);
        for id in &obsolete {
            let path = file_path(&self.dir, *id);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        state.file_ids = kept;
        debug!(node = %self.identifier, removed = obsolete.len(), "dropped flushed log files");
        Ok(())
    }

    /// Reader over every entry still held by the node
    pub fn reader(&self) -> Result<WalReader> {
        let mut state = self.state.lock();
        if let Some(writer) = state.writer.as_mut() {
            writer.sync()?;
        }
        let paths = state
            .file_ids
            .iter()
            .map(|id| file_path(&self.dir, *id))
            .collect();
        WalReader::open_files(paths)
    }

    /// Sync and release the current writer
    pub fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.state.lock().writer.take() {
            writer.sync()?;
        }
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.writer = None;
        state.file_ids.clear();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for LogNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogNode")
            .field("identifier", &self.identifier)
            .field("dir", &self.dir)
            .finish()
    }
}

// =============================================================================
// Log Node Manager
// =============================================================================

/// Registry of the log nodes under one WAL directory
///
/// Nodes are created on first use and shared; a node is keyed by the
/// identifier of the data file it protects.
pub struct LogNodeManager {
    wal_dir: PathBuf,
    sync_strategy: WalSyncStrategy,
    nodes: Mutex<HashMap<String, Arc<LogNode>>>,
}

impl LogNodeManager {
    pub fn new(wal_dir: impl Into<PathBuf>, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let wal_dir = wal_dir.into();
        fs::create_dir_all(&wal_dir)?;
        Ok(Self {
            wal_dir,
            sync_strategy,
            nodes: Mutex::new(HashMap::new()),
        })
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Get the node for `identifier`, opening it (and any files a previous
    /// run left) if needed
    pub fn get_node(&self, identifier: &str) -> Result<Arc<LogNode>> {
        validate_identifier(identifier)?;
        let mut nodes = self.nodes.lock();
        if let Some(node) = nodes.get(identifier) {
            return Ok(Arc::clone(node));
        }
        let node = Arc::new(LogNode::open(
            self.wal_dir.join(identifier),
            identifier.to_string(),
            self.sync_strategy,
        )?);
        nodes.insert(identifier.to_string(), Arc::clone(&node));
        Ok(node)
    }

    /// Whether a node directory exists on disk
    pub fn node_exists(&self, identifier: &str) -> bool {
        validate_identifier(identifier).is_ok() && self.wal_dir.join(identifier).is_dir()
    }

    /// Identifiers of every node directory on disk, sorted
    pub fn node_identifiers(&self) -> Result<Vec<String>> {
        let mut identifiers = Vec::new();
        for entry in fs::read_dir(&self.wal_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => identifiers.push(name),
                Err(name) => warn!(wal_dir = %self.wal_dir.display(), ?name, "ignoring non UTF-8 log node"),
            }
        }
        identifiers.sort_unstable();
        Ok(identifiers)
    }

    /// Remove a node and all its files; a missing node is not an error
    pub fn delete_node(&self, identifier: &str) -> Result<()> {
        validate_identifier(identifier)?;
        let removed = self.nodes.lock().remove(identifier);
        match removed {
            Some(node) => node.delete()?,
            None => match fs::remove_dir_all(self.wal_dir.join(identifier)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        debug!(node = identifier, "deleted log node");
        Ok(())
    }

    /// Sync and close every open node
    pub fn close(&self) -> Result<()> {
        let nodes: Vec<Arc<LogNode>> = self.nodes.lock().drain().map(|(_, n)| n).collect();
        for node in &nodes {
            node.close()?;
        }
        info!(nodes = nodes.len(), "closed log nodes");
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn file_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", LOG_FILE_PREFIX, id, LOG_FILE_SUFFIX))
}

fn list_file_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let id = name
            .strip_prefix(LOG_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(LOG_FILE_SUFFIX))
            .and_then(|digits| digits.parse::<u64>().ok());
        match id {
            Some(id) => ids.push(id),
            None => warn!(dir = %dir.display(), file = name, "ignoring unexpected file in log node"),
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty()
        || identifier == "."
        || identifier == ".."
        || identifier.contains(['/', '\\'])
    {
        return Err(ChronoError::Config(format!(
            "invalid log node identifier: {:?}",
            identifier
        )));
    }
    Ok(())
}
