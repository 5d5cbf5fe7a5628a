//! MemTable Module
//!
//! In-memory column store for data that has not been flushed yet.
//!
//! ## Responsibilities
//! - Buffer typed points per device and measurement
//! - Apply range deletions to buffered points
//! - Track size for flush triggers
//! - Ordered snapshots for flushing into chunk groups
//!
//! ## Data Structure Choice
//! device → measurement → timestamp → value, all `BTreeMap`s behind one
//! `RwLock`: ordered devices and timestamps are exactly what a flush needs,
//! and a later insert at the same timestamp replaces the earlier one.

mod table;

pub use table::MemTable;

use crate::schema::{DataType, Timestamp, Value};

/// Immutable copy of one buffered series, ordered by timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOnlyMemChunk {
    pub measurement: String,
    pub data_type: DataType,
    pub points: Vec<(Timestamp, Value)>,
}

impl ReadOnlyMemChunk {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.points.first().map(|(t, _)| *t)
    }

    pub fn end_time(&self) -> Option<Timestamp> {
        self.points.last().map(|(t, _)| *t)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Timestamp, Value)> {
        self.points.iter()
    }
}
