//! Query File Tracker
//!
//! Per-job file usage sets backed by shared per-file reference counters.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

/// Identifier of a query job
pub type JobId = u64;

// =============================================================================
// File Reference Counter
// =============================================================================

/// Number of live queries reading each `(file, sealed)` pair
#[derive(Debug, Default)]
pub struct FileReferenceCounter {
    counts: DashMap<(PathBuf, bool), usize>,
}

impl FileReferenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, file: &Path, sealed: bool) {
        *self.counts.entry((file.to_path_buf(), sealed)).or_insert(0) += 1;
    }

    /// Drop one reference; the entry disappears when it reaches zero
    pub fn decrement(&self, file: &Path, sealed: bool) {
        let key = (file.to_path_buf(), sealed);
        let mut drained = false;
        match self.counts.get_mut(&key) {
            Some(mut count) => {
                *count -= 1;
                drained = *count == 0;
            }
            None => warn!(file = %file.display(), sealed, "releasing an unreferenced file"),
        }
        if drained {
            self.counts.remove_if(&key, |_, count| *count == 0);
        }
    }

    pub fn reference_count(&self, file: &Path, sealed: bool) -> usize {
        self.counts
            .get(&(file.to_path_buf(), sealed))
            .map_or(0, |count| *count)
    }

    /// Whether any query reads `file`, sealed or not
    pub fn is_referenced(&self, file: &Path) -> bool {
        self.reference_count(file, true) > 0 || self.reference_count(file, false) > 0
    }
}

// =============================================================================
// Query File Tracker
// =============================================================================

#[derive(Debug, Default)]
struct JobUsage {
    sealed: HashSet<PathBuf>,
    unsealed: HashSet<PathBuf>,
}

/// Per-job file usage registry
///
/// ## Concurrency:
/// Adding a file to a job's set and incrementing the shared counter happen
/// while the job's map entry is locked, so concurrent registrations of the
/// same file by one job increment the counter exactly once.
#[derive(Debug)]
pub struct QueryFileTracker {
    jobs: DashMap<JobId, JobUsage>,
    counter: Arc<FileReferenceCounter>,
    next_job: AtomicU64,
}

impl QueryFileTracker {
    pub fn new(counter: Arc<FileReferenceCounter>) -> Self {
        Self {
            jobs: DashMap::new(),
            counter,
            next_job: AtomicU64::new(1),
        }
    }

    /// Hand out a fresh job id
    pub fn allocate_job(&self) -> JobId {
        self.next_job.fetch_add(1, Ordering::Relaxed)
    }

    /// Record that `job` reads `file`; the first registration per category
    /// takes a shared reference
    pub fn register_usage(&self, job: JobId, file: &Path, sealed: bool) {
        let mut usage = self.jobs.entry(job).or_default();
        let set = if sealed {
            &mut usage.sealed
        } else {
            &mut usage.unsealed
        };
        if set.insert(file.to_path_buf()) {
            self.counter.increment(file, sealed);
        }
    }

    /// Release every reference held by `job` and forget it
    pub fn end_job(&self, job: JobId) {
        let Some((_, usage)) = self.jobs.remove(&job) else {
            return;
        };
        for file in &usage.sealed {
            self.counter.decrement(file, true);
        }
        for file in &usage.unsealed {
            self.counter.decrement(file, false);
        }
        debug!(
            job,
            sealed = usage.sealed.len(),
            unsealed = usage.unsealed.len(),
            "query job released its files"
        );
    }

    /// Number of jobs holding references
    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn counter(&self) -> &Arc<FileReferenceCounter> {
        &self.counter
    }
}
