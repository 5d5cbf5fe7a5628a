//! MemTable implementation
//!
//! Nested BTreeMap column store with RwLock for concurrency.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::{ChronoError, Result};
use crate::schema::{DataType, Timestamp, Value};

use super::ReadOnlyMemChunk;

/// Fixed per-point overhead counted on top of the value payload
const POINT_OVERHEAD: usize = std::mem::size_of::<Timestamp>();

struct SeriesBuffer {
    data_type: DataType,
    points: BTreeMap<Timestamp, Value>,
}

type Devices = BTreeMap<String, BTreeMap<String, SeriesBuffer>>;

/// In-memory table for unflushed points
///
/// ## Concurrency:
/// - `data`: RwLock (many concurrent readers, exclusive writer)
/// - `size`: approximate byte count, updated under the write lock
pub struct MemTable {
    data: RwLock<Devices>,
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Insert one row: several measurements of `device` sharing a timestamp
    ///
    /// Returns the new approximate size. A measurement whose buffered type
    /// differs from the supplied value is rejected before anything is applied.
    pub fn insert(
        &self,
        device: &str,
        timestamp: Timestamp,
        values: &[(String, Value)],
    ) -> Result<usize> {
        if values.is_empty() {
            return Ok(self.size());
        }

        let mut data = self.data.write();

        if let Some(series) = data.get(device) {
            for (measurement, value) in values {
                if let Some(buffer) = series.get(measurement) {
                    if buffer.data_type != value.data_type() {
                        return Err(ChronoError::TypeMismatch {
                            measurement: measurement.clone(),
                            expected: buffer.data_type.to_string(),
                            value: value.to_string(),
                        });
                    }
                }
            }
        }

        let series = data.entry(device.to_string()).or_default();
        let mut added = 0usize;
        let mut removed = 0usize;
        for (measurement, value) in values {
            let buffer = series
                .entry(measurement.clone())
                .or_insert_with(|| SeriesBuffer {
                    data_type: value.data_type(),
                    points: BTreeMap::new(),
                });
            added += POINT_OVERHEAD + value.approx_size();
            if let Some(old) = buffer.points.insert(timestamp, value.clone()) {
                removed += POINT_OVERHEAD + old.approx_size();
            }
        }

        let size = self.size.load(Ordering::Relaxed) + added - removed;
        self.size.store(size, Ordering::Relaxed);
        Ok(size)
    }

    /// Insert a single point
    pub fn insert_point(
        &self,
        device: &str,
        measurement: &str,
        timestamp: Timestamp,
        value: Value,
    ) -> Result<usize> {
        self.insert(device, timestamp, &[(measurement.to_string(), value)])
    }

    /// Remove every buffered point of the series with `t <= upper_bound`
    ///
    /// Returns the number of removed points.
    pub fn delete(&self, device: &str, measurement: &str, upper_bound: Timestamp) -> usize {
        let mut data = self.data.write();

        let Some(series) = data.get_mut(device) else {
            return 0;
        };
        let Some(buffer) = series.get_mut(measurement) else {
            return 0;
        };

        let kept = match upper_bound.checked_add(1) {
            Some(first_kept) => buffer.points.split_off(&first_kept),
            None => BTreeMap::new(),
        };
        let dropped = std::mem::replace(&mut buffer.points, kept);

        let freed: usize = dropped
            .values()
            .map(|v| POINT_OVERHEAD + v.approx_size())
            .sum();
        self.size.fetch_sub(freed, Ordering::Relaxed);

        if buffer.points.is_empty() {
            series.remove(measurement);
        }
        if series.is_empty() {
            data.remove(device);
        }

        dropped.len()
    }

    /// Copy of one buffered series, if present
    pub fn query(&self, device: &str, measurement: &str) -> Option<ReadOnlyMemChunk> {
        let data = self.data.read();
        let buffer = data.get(device)?.get(measurement)?;
        Some(ReadOnlyMemChunk {
            measurement: measurement.to_string(),
            data_type: buffer.data_type,
            points: buffer.points.iter().map(|(t, v)| (*t, v.clone())).collect(),
        })
    }

    /// Ordered copy of everything buffered: devices, then their series
    pub fn snapshot(&self) -> Vec<(String, Vec<ReadOnlyMemChunk>)> {
        let data = self.data.read();
        data.iter()
            .map(|(device, series)| {
                let chunks = series
                    .iter()
                    .map(|(measurement, buffer)| ReadOnlyMemChunk {
                        measurement: measurement.clone(),
                        data_type: buffer.data_type,
                        points: buffer.points.iter().map(|(t, v)| (*t, v.clone())).collect(),
                    })
                    .collect();
                (device.clone(), chunks)
            })
            .collect()
    }

    /// Latest buffered timestamp of `device` across its series
    pub fn end_time(&self, device: &str) -> Option<Timestamp> {
        let data = self.data.read();
        data.get(device)?
            .values()
            .filter_map(|buffer| buffer.points.keys().next_back().copied())
            .max()
    }

    /// Devices with buffered points, in order
    pub fn devices(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Total number of buffered points
    pub fn point_count(&self) -> usize {
        self.data
            .read()
            .values()
            .flat_map(|series| series.values())
            .map(|buffer| buffer.points.len())
            .sum()
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Check if the table holds no points
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Clear all entries (after successful flush)
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.clear();
        self.size.store(0, Ordering::Relaxed);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
