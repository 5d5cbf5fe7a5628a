//! Recovery Orchestrator
//!
//! Brings one data file and its resource back to a sealed, durable state
//! after a restart.

use tracing::{debug, error, info};

use crate::error::{ChronoError, Result};
use crate::memtable::MemTable;
use crate::resource::FileResource;
use crate::schema::FileSchema;
use crate::storage::{flush_memtable, DataFileReader, RestorableWriter};
use crate::version::VersionController;
use crate::wal::LogNodeManager;

use super::replayer::{log_node_identifier, LogReplayer, ReplayStats};

/// What recovery found and did for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryState {
    /// The data file does not exist; nothing was done
    Missing,
    /// The file was sealed. Its resource was either loaded from the companion
    /// file or rebuilt from the footer index and written out.
    Intact { resource_present: bool },
    /// The file ended before its footer: surviving chunk groups were kept,
    /// the WAL was replayed on top and the file was sealed again
    Crashed {
        surviving_groups: usize,
        replayed: ReplayStats,
    },
}

/// Recovers data files of one kind (sequence or unsequence)
pub struct FileRecoverPerformer<'a> {
    log_node_prefix: &'a str,
    schema: &'a FileSchema,
    versions: &'a dyn VersionController,
    log_nodes: &'a LogNodeManager,
    /// Unsequenced files accept rows older than the persisted end time
    accept_unseq: bool,
}

impl<'a> FileRecoverPerformer<'a> {
    pub fn new(
        log_node_prefix: &'a str,
        schema: &'a FileSchema,
        versions: &'a dyn VersionController,
        log_nodes: &'a LogNodeManager,
        accept_unseq: bool,
    ) -> Self {
        Self {
            log_node_prefix,
            schema,
            versions,
            log_nodes,
            accept_unseq,
        }
    }

    /// Recover the file behind `resource`
    ///
    /// On success the file is sealed and its resource is valid, durable and
    /// closed. Any failure is wrapped in [`ChronoError::Recovery`] and the file
    /// must not be served.
    pub fn recover(&self, resource: &mut FileResource) -> Result<RecoveryState> {
        let file = resource.file().to_path_buf();
        if !file.exists() {
            error!(file = %file.display(), "data file is missing, skipping its recovery");
            return Ok(RecoveryState::Missing);
        }

        let state = self
            .recover_existing(resource)
            .map_err(|e| ChronoError::recovery(&file, e))?;
        info!(file = %file.display(), ?state, "recovered data file");
        Ok(state)
    }

    // =========================================================================
    // State Handlers
    // =========================================================================

    fn recover_existing(&self, resource: &mut FileResource) -> Result<RecoveryState> {
        let restorable = RestorableWriter::open(resource.file())?;

        let state = if restorable.has_crashed() {
            self.recover_crashed(resource, restorable)?
        } else {
            self.recover_intact(resource)?
        };

        // Everything the log held is now in the sealed file
        let identifier = log_node_identifier(self.log_node_prefix, resource.file());
        self.log_nodes.delete_node(&identifier)?;

        resource.close()?;
        Ok(state)
    }

    fn recover_intact(&self, resource: &mut FileResource) -> Result<RecoveryState> {
        if resource.file_exists() {
            resource.deserialize()?;
            return Ok(RecoveryState::Intact {
                resource_present: true,
            });
        }

        debug!(file = %resource.file().display(), "resource file absent, rebuilding from footer");
        let reader = DataFileReader::open(resource.file())?;
        for group in &reader.metadata().chunk_groups {
            for chunk in &group.chunks {
                resource.update_start_time(&group.device, chunk.start_time);
                resource.update_end_time(&group.device, chunk.end_time);
            }
        }
        resource.serialize()?;
        Ok(RecoveryState::Intact {
            resource_present: false,
        })
    }

    fn recover_crashed(
        &self,
        resource: &mut FileResource,
        restorable: RestorableWriter,
    ) -> Result<RecoveryState> {
        // Persisted ranges first, so replay can skip rows already on disk
        let surviving_groups = restorable.chunk_groups().len();
        for group in restorable.chunk_groups() {
            for chunk in &group.chunks {
                resource.update_start_time(&group.device, chunk.start_time);
                resource.update_end_time(&group.device, chunk.end_time);
            }
        }

        let memtable = MemTable::new();
        let replayed = LogReplayer::new(
            self.log_nodes,
            self.log_node_prefix,
            resource,
            self.versions,
            self.schema,
            &memtable,
            self.accept_unseq,
        )
        .replay_logs()?;

        let mut writer = restorable.into_writer()?;
        if !memtable.is_empty() {
            flush_memtable(&memtable, &mut writer, self.versions)?;
        }
        writer.end_file(self.schema)?;
        resource.serialize()?;

        Ok(RecoveryState::Crashed {
            surviving_groups,
            replayed,
        })
    }
}
