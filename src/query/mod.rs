//! Query File Tracking Module
//!
//! Counts the data files read by in-flight queries so that compaction never
//! removes a file a live query still reads.
//!
//! ## Responsibilities
//! - Record, per query job, which sealed and unsealed files it touched
//! - Hold exactly one shared reference per (job, file, sealed)
//! - Release every reference of a job when it ends

mod tracker;

pub use tracker::{FileReferenceCounter, JobId, QueryFileTracker};
