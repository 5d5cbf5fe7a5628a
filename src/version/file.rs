//! File-backed version controller
//!
//! Checkpoints are marker files named `Version-<N>`, moved forward by rename.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{ChronoError, Result};
use crate::storage::sync_dir;

use super::VersionController;

const FILE_PREFIX: &str = "Version-";

/// Default number of versions between checkpoints
pub const DEFAULT_SAVE_INTERVAL: u64 = 100;

struct Counter {
    /// Last checkpointed value (name of the marker on disk)
    prev: u64,
    /// Last issued value
    curr: u64,
}

/// Version controller persisting its floor as a marker file
///
/// ## Concurrency:
/// - `next_version` and checkpoints are serialized by `counter`
/// - `curr_version` reads a relaxed mirror without taking the lock
pub struct FileVersionController {
    directory: PathBuf,
    save_interval: u64,
    counter: Mutex<Counter>,
    curr_mirror: AtomicU64,
}

impl FileVersionController {
    /// Restore from `directory` with the default checkpoint interval
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        Self::with_save_interval(directory, DEFAULT_SAVE_INTERVAL)
    }

    /// Restore from `directory`, checkpointing every `save_interval` versions
    ///
    /// On startup:
    /// 1. Scan for `Version-<N>` markers, keep the highest, delete the rest
    /// 2. Create `Version-0` if none exist
    /// 3. Skip `save_interval` numbers and checkpoint immediately, so nothing
    ///    issued before a crash can be issued again
    pub fn with_save_interval(directory: impl AsRef<Path>, save_interval: u64) -> Result<Self> {
        if save_interval == 0 {
            return Err(ChronoError::Config(
                "version save interval must be at least 1".to_string(),
            ));
        }

        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let prev = Self::restore(&directory)?;
        let controller = Self {
            directory,
            save_interval,
            counter: Mutex::new(Counter { prev, curr: prev }),
            curr_mirror: AtomicU64::new(prev),
        };

        {
            let mut counter = controller.counter.lock();
            counter.curr = counter.prev + save_interval;
            controller.checkpoint(&mut counter)?;
            controller.curr_mirror.store(counter.curr, Ordering::Relaxed);
        }

        Ok(controller)
    }

    /// Directory holding the marker
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Versions issued between checkpoints
    pub fn save_interval(&self) -> u64 {
        self.save_interval
    }

    /// Value named by the marker on disk
    pub fn checkpointed_version(&self) -> u64 {
        self.counter.lock().prev
    }

    /// Highest marker in `directory` without restoring from it
    ///
    /// Nothing on disk changes; `None` when no marker exists.
    pub fn read_marker(directory: impl AsRef<Path>) -> Result<Option<u64>> {
        let mut highest = None;
        for entry in fs::read_dir(directory.as_ref())? {
            if let Some(version) = Self::parse_marker(&entry?.path()) {
                highest = highest.max(Some(version));
            }
        }
        Ok(highest)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Find the surviving checkpoint, creating `Version-0` when there is none
    fn restore(directory: &Path) -> Result<u64> {
        let mut markers: Vec<(u64, PathBuf)> = Vec::new();

        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(version) = Self::parse_marker(&path) {
                markers.push((version, path));
            }
        }

        let Some(&(max_version, _)) = markers.iter().max_by_key(|(v, _)| *v) else {
            let path = Self::marker_path(directory, 0);
            OpenOptions::new().create(true).write(true).open(&path)?;
            sync_dir(directory)?;
            info!(path = %path.display(), "created initial version marker");
            return Ok(0);
        };

        // A crash during a checkpoint can leave two markers behind
        for (version, path) in &markers {
            if *version != max_version {
                warn!(path = %path.display(), "removing stale version marker");
                fs::remove_file(path)?;
            }
        }

        Ok(max_version)
    }

    /// Move the marker from `prev` to `curr` and advance `prev`
    fn checkpoint(&self, counter: &mut Counter) -> Result<()> {
        let old = Self::marker_path(&self.directory, counter.prev);
        let new = Self::marker_path(&self.directory, counter.curr);
        if old != new {
            fs::rename(&old, &new)?;
            sync_dir(&self.directory)?;
        }
        info!(
            previous = %old.display(),
            current = %new.display(),
            "version file updated"
        );
        counter.prev = counter.curr;
        Ok(())
    }

    fn marker_path(directory: &Path, version: u64) -> PathBuf {
        directory.join(format!("{}{}", FILE_PREFIX, version))
    }

    /// "Version-42" → Some(42)
    fn parse_marker(path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        let digits = name.strip_prefix(FILE_PREFIX)?;
        match digits.parse() {
            Ok(version) => Some(version),
            Err(_) => {
                warn!(path = %path.display(), "ignoring unparsable version marker");
                None
            }
        }
    }
}

impl VersionController for FileVersionController {
    /// Issue the next version, checkpointing when `curr - prev >= save_interval`
    ///
    /// If the checkpoint fails the number is not issued and the counter is
    /// rolled back, so every issued number stays below `prev + save_interval`.
    fn next_version(&self) -> Result<u64> {
        let mut counter = self.counter.lock();
        counter.curr += 1;

        if counter.curr - counter.prev >= self.save_interval {
            if let Err(e) = self.checkpoint(&mut counter) {
                counter.curr -= 1;
                return Err(e);
            }
        }

        self.curr_mirror.store(counter.curr, Ordering::Relaxed);
        Ok(counter.curr)
    }

    fn curr_version(&self) -> u64 {
        self.curr_mirror.load(Ordering::Relaxed)
    }
}
