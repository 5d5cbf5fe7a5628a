//! Version Module
//!
//! Durable, monotonic version numbers used to order tombstones against the
//! chunk groups they delete from.
//!
//! ## Responsibilities
//! - Hand out strictly increasing numbers (`next_version`)
//! - Checkpoint the counter every `save_interval` numbers
//! - Never reissue a number after a crash, even between checkpoints
//!
//! ## On-disk State
//! ```text
//! {system_dir}/
//!   └── Version-<N>     (empty marker file, N = last checkpoint)
//! ```

mod file;

pub use file::FileVersionController;

use crate::error::Result;

/// Source of version numbers
pub trait VersionController: Send + Sync {
    /// Issue the next version number
    fn next_version(&self) -> Result<u64>;

    /// Last issued version. Diagnostic only: not synchronized with
    /// `next_version` and must not be used to allocate numbers.
    fn curr_version(&self) -> u64;
}
