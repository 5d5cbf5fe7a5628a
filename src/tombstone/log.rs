//! Tombstone Log
//!
//! Append-only text log of modifications for one data file.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ChronoError, Result};
use crate::schema::SeriesPath;

use super::Modification;

/// Sentinel line cancelling the most recent record
const ABORT_MARK: &str = "aborted";

/// Append-only deletion log
///
/// ## Concurrency:
/// - Appends are serialized by `writer`
/// - Every `write`/`abort` is flushed and fsync'd before returning
/// - `read` opens its own handle and may run alongside appends
pub struct TombstoneLog {
    /// Path of the log file
    path: PathBuf,

    /// Lazily opened append handle; `None` until first write or after close
    writer: Mutex<Option<BufWriter<File>>>,
}

impl TombstoneLog {
    /// Suffix appended to the data file path
    pub const FILE_SUFFIX: &'static str = ".mods";

    /// Log stored at exactly `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    /// Log companion of a data file: `<data_file>.mods`
    pub fn for_data_file(data_file: &Path) -> Self {
        Self::new(Self::companion_path(data_file))
    }

    /// Path of the companion log of `data_file`
    pub fn companion_path(data_file: &Path) -> PathBuf {
        let mut name = data_file.as_os_str().to_owned();
        name.push(Self::FILE_SUFFIX);
        PathBuf::from(name)
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one record
    pub fn write(&self, modification: &Modification) -> Result<()> {
        Self::ensure_storable(modification.path())?;
        self.append_line(&modification.encode())
    }

    /// Fail unless `path` can be written as one field of a record line
    pub fn ensure_storable(path: &SeriesPath) -> Result<()> {
        let rendered = path.to_string();
        if rendered.contains(['\n', ',']) {
            return Err(ChronoError::Storage(format!(
                "Series path cannot be stored in a tombstone log: {:?}",
                rendered
            )));
        }
        Ok(())
    }

    /// Durably append the sentinel cancelling the most recent record
    pub fn abort(&self) -> Result<()> {
        warn!(path = %self.path.display(), "aborting last tombstone record");
        self.append_line(ABORT_MARK)
    }

    /// Replay every record from the start of the log
    ///
    /// Each `aborted` line removes the most recent record accumulated so far.
    /// Any undecodable line fails the whole read. A missing log is empty.
    pub fn read(&self) -> Result<Vec<Modification>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no modification has been written to this file");
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut modifications = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line == ABORT_MARK {
                if modifications.pop().is_none() {
                    debug!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        "abort marker with nothing to cancel"
                    );
                }
                continue;
            }

            let modification = Modification::decode(&line).map_err(|e| {
                ChronoError::Corruption(format!(
                    "{} line {}: {}",
                    self.path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            modifications.push(modification);
        }

        Ok(modifications)
    }

    /// Release the append handle; safe to call repeatedly
    pub fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
        }
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn append_line(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(BufWriter::new(file));
        }
        let writer = guard
            .as_mut()
            .ok_or_else(|| ChronoError::Storage("tombstone writer unavailable".to_string()))?;

        let start = writer.get_ref().metadata()?.len();
        let result = Self::write_line(writer, line);
        if result.is_err() {
            // Discard the partial line; the next append reopens the file
            if let Some(writer) = guard.take() {
                let (file, _unwritten) = writer.into_parts();
                if let Err(e) = file.set_len(start) {
                    warn!(path = %self.path.display(), error = %e, "failed to cut a partial tombstone record");
                }
            }
        }
        result
    }

    fn write_line(writer: &mut BufWriter<File>, line: &str) -> Result<()> {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

impl std::fmt::Debug for TombstoneLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstoneLog")
            .field("path", &self.path)
            .finish()
    }
}
