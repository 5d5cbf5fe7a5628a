//! Configuration for ChronoDB
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

use crate::error::{ChronoError, Result};

/// Main configuration for a ChronoDB storage engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for data files.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── sequence/     (in-order data files + .resource + .mods)
    ///     └── unsequence/   (out-of-order data files + .resource + .mods)
    pub data_dir: PathBuf,

    /// Directory holding version markers and the schema log.
    /// `None` means `{data_dir}/system`.
    pub system_dir: Option<PathBuf>,

    /// Directory holding WAL log nodes.
    /// `None` means `{data_dir}/wal`.
    pub wal_dir: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // Version Configuration
    // -------------------------------------------------------------------------
    /// Number of versions handed out between two durable checkpoints
    pub version_save_interval: u64,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of a working memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Recovery Configuration
    // -------------------------------------------------------------------------
    /// Worker threads used to recover data files at startup
    pub recovery_threads: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chronodb_data"),
            system_dir: None,
            wal_dir: None,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            version_save_interval: 100,
            memtable_size_limit: 128 * 1024 * 1024, // 128 MB
            recovery_threads: 4,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory for version markers and the schema log
    pub fn system_dir(&self) -> PathBuf {
        self.system_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("system"))
    }

    /// Directory for WAL log nodes
    pub fn wal_dir(&self) -> PathBuf {
        self.wal_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("wal"))
    }

    /// Directory for sequence data files
    pub fn sequence_dir(&self) -> PathBuf {
        self.data_dir.join("sequence")
    }

    /// Directory for unsequence data files
    pub fn unsequence_dir(&self) -> PathBuf {
        self.data_dir.join("unsequence")
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.version_save_interval == 0 {
            return Err(ChronoError::Config(
                "version_save_interval must be at least 1".to_string(),
            ));
        }
        if self.recovery_threads == 0 {
            return Err(ChronoError::Config(
                "recovery_threads must be at least 1".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(ChronoError::Config(
                "EveryNEntries count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the system directory (version markers, schema log)
    pub fn system_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.system_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the WAL directory
    pub fn wal_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.wal_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set how many versions are issued between checkpoints
    pub fn version_save_interval(mut self, interval: u64) -> Self {
        self.config.version_save_interval = interval;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the number of recovery worker threads
    pub fn recovery_threads(mut self, threads: usize) -> Self {
        self.config.recovery_threads = threads;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
