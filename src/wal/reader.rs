//! WAL Reader
//!
//! Reads entries back from the files of a log node, oldest first.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, warn};

use crate::error::{ChronoError, Result};

use super::entry::MAX_PAYLOAD;
use super::{WalEntry, HEADER_SIZE};

/// File currently being read
struct OpenFile {
    path: PathBuf,
    reader: BufReader<File>,
    len: u64,
    position: u64,
}

/// Reads entries from one or more WAL files in order
///
/// The last frame of the last file may be torn by a crash: it is reported
/// with a warning and ends the log. Any other damaged frame is corruption.
pub struct WalReader {
    pending: VecDeque<PathBuf>,
    current: Option<OpenFile>,
    last_lsn: u64,
}

impl WalReader {
    /// Open a single WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_files(vec![path.to_path_buf()])
    }

    /// Open a sequence of WAL files, read in the given order
    pub fn open_files(paths: Vec<PathBuf>) -> Result<Self> {
        let mut reader = Self {
            pending: paths.into(),
            current: None,
            last_lsn: 0,
        };
        // Surface a missing first file at open time
        reader.advance_file()?;
        Ok(reader)
    }

    /// Read the next entry from the WAL
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        loop {
            let is_last = self.pending.is_empty();
            let Some(file) = self.current.as_mut() else {
                return Ok(None);
            };

            let remaining = file.len - file.position;
            if remaining == 0 {
                self.advance_file()?;
                continue;
            }
            if remaining < HEADER_SIZE as u64 {
                return self.torn_frame(is_last, "incomplete frame header");
            }

            let lsn = file.reader.read_u64::<LittleEndian>()?;
            let crc = file.reader.read_u32::<LittleEndian>()?;
            let len = file.reader.read_u32::<LittleEndian>()?;
            if len > MAX_PAYLOAD {
                return Err(ChronoError::Corruption(format!(
                    "{}: frame at offset {} declares {} bytes",
                    file.path.display(),
                    file.position,
                    len
                )));
            }

            let frame_len = HEADER_SIZE as u64 + len as u64;
            if frame_len > remaining {
                return self.torn_frame(is_last, "incomplete frame payload");
            }

            let mut payload = vec![0u8; len as usize];
            file.reader.read_exact(&mut payload)?;
            let frame_offset = file.position;
            file.position += frame_len;
            let at_tail = file.position == file.len;

            match WalEntry::deserialize(lsn, crc, &payload) {
                Ok(entry) => {
                    self.last_lsn = entry.lsn;
                    return Ok(Some(entry));
                }
                Err(ChronoError::Corruption(_)) if is_last && at_tail => {
                    return self.torn_frame(true, "checksum mismatch in final frame");
                }
                Err(ChronoError::Corruption(reason)) => {
                    return Err(ChronoError::Corruption(format!(
                        "{} at offset {}: {}",
                        file.path.display(),
                        frame_offset,
                        reason
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// LSN of the last entry returned
    pub fn last_lsn(&self) -> u64 {
        self.last_lsn
    }

    /// Release the open file handle; later reads return `None`
    pub fn close(&mut self) {
        self.current = None;
        self.pending.clear();
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn advance_file(&mut self) -> Result<()> {
        self.current = None;
        if let Some(path) = self.pending.pop_front() {
            let file = File::open(&path)?;
            let len = file.metadata()?.len();
            debug!(file = %path.display(), len, "reading WAL file");
            self.current = Some(OpenFile {
                path,
                reader: BufReader::new(file),
                len,
                position: 0,
            });
        }
        Ok(())
    }

    fn torn_frame(&mut self, is_last: bool, reason: &str) -> Result<Option<WalEntry>> {
        let (path, offset) = match &self.current {
            Some(file) => (file.path.clone(), file.position),
            None => (PathBuf::new(), 0),
        };
        if !is_last {
            return Err(ChronoError::Corruption(format!(
                "{} at offset {}: {} before the end of the log",
                path.display(),
                offset,
                reason
            )));
        }
        warn!(
            file = %path.display(),
            offset,
            last_lsn = self.last_lsn,
            reason,
            "WAL ends with a torn frame, ignoring it"
        );
        self.close();
        Ok(None)
    }
}

/// Iterator over WAL entries; stops after the first error
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.reader.close();
                Some(Err(e))
            }
        }
    }
}
