//! WAL Writer
//!
//! Handles appending entries to one WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::{Operation, WalEntry};

/// Writes entries to a WAL file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// LSN of the last appended entry
    current_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries appended since the last fsync
    unsynced: usize,
}

impl WalWriter {
    /// Open or create a WAL file for appending; the next entry gets `last_lsn + 1`
    pub fn open(path: &Path, last_lsn: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            current_lsn: last_lsn,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append an operation, returning its LSN
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        let entry = WalEntry::new(self.current_lsn + 1, operation);
        let frame = entry.serialize()?;
        self.writer.write_all(&frame)?;
        self.current_lsn = entry.lsn;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        } else {
            self.writer.flush()?;
        }
        Ok(entry.lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Get the current LSN
    pub fn current_lsn(&self) -> u64 {
        self.current_lsn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
