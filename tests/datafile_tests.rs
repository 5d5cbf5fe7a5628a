//! Tests for data files
//!
//! These tests verify:
//! - Sealed files are readable through their footer index
//! - Unsealed files are detected and their intact chunk groups salvaged
//! - A salvaged file can be extended and sealed again
//! - The memtable flush path issues one version per flush

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chronodb::memtable::{MemTable, ReadOnlyMemChunk};
use chronodb::schema::FileSchema;
use chronodb::storage::{flush_memtable, DataFileReader, DataFileWriter, RestorableWriter};
use chronodb::{ChronoError, DataType, Result, Timestamp, Value, VersionController};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct CountingVersions(AtomicU64);

impl VersionController for CountingVersions {
    fn next_version(&self) -> Result<u64> {
        Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn curr_version(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn chunk(measurement: &str, times: &[Timestamp]) -> ReadOnlyMemChunk {
    ReadOnlyMemChunk {
        measurement: measurement.to_string(),
        data_type: DataType::Int64,
        points: times.iter().map(|t| (*t, Value::Int64(*t * 10))).collect(),
    }
}

fn schema() -> FileSchema {
    let mut schema = FileSchema::new();
    schema.register("s0", DataType::Int64);
    schema.register("s1", DataType::Int64);
    schema
}

/// Write two chunk groups without sealing the file
fn write_unsealed(path: &Path) -> DataFileWriter {
    let mut writer = DataFileWriter::create(path).unwrap();
    writer
        .write_chunk_group("root.d0", 1, &[chunk("s0", &[1, 2, 3])])
        .unwrap();
    writer
        .write_chunk_group("root.d1", 2, &[chunk("s1", &[4, 5])])
        .unwrap();
    writer.sync().unwrap();
    writer
}

fn truncate_by(path: &Path, bytes: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - bytes).unwrap();
}

// =============================================================================
// Sealed File Tests
// =============================================================================

#[test]
fn test_write_seal_and_read() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("000001.tsfile");

    let mut writer = DataFileWriter::create(&path).unwrap();
    writer
        .write_chunk_group("root.d0", 3, &[chunk("s0", &[1, 2]), chunk("s1", &[2])])
        .unwrap();
    writer
        .write_chunk_group("root.d0", 4, &[chunk("s0", &[5])])
        .unwrap();
    let metadata = writer.end_file(&schema()).unwrap();
    assert_eq!(metadata.chunk_groups.len(), 2);

    let mut reader = DataFileReader::open(&path).unwrap();
    assert_eq!(reader.metadata(), &metadata);
    assert_eq!(reader.metadata().schema, schema());

    let series = reader.read_series("root.d0", "s0").unwrap();
    assert_eq!(
        series,
        vec![
            (3, vec![(1, Value::Int64(10)), (2, Value::Int64(20))]),
            (4, vec![(5, Value::Int64(50))]),
        ]
    );
    assert!(reader.read_series("root.d9", "s0").unwrap().is_empty());
}

#[test]
fn test_chunk_group_time_range() {
    let temp_dir = TempDir::new().unwrap();
    let mut writer = DataFileWriter::create(&temp_dir.path().join("1.tsfile")).unwrap();

    let group = writer
        .write_chunk_group("root.d0", 1, &[chunk("s0", &[5, 9]), chunk("s1", &[2, 6])])
        .unwrap()
        .unwrap();

    assert_eq!(group.time_range(), Some((2, 9)));
    assert_eq!(group.chunks[0].start_time, 5);
    assert_eq!(group.chunks[1].end_time, 6);
}

#[test]
fn test_empty_chunks_write_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let mut writer = DataFileWriter::create(&temp_dir.path().join("1.tsfile")).unwrap();
    let offset = writer.offset();

    let group = writer
        .write_chunk_group("root.d0", 1, &[chunk("s0", &[])])
        .unwrap();

    assert!(group.is_none());
    assert_eq!(writer.offset(), offset);
    assert!(writer.chunk_groups().is_empty());
}

#[test]
fn test_reader_rejects_unsealed_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    drop(write_unsealed(&path));

    assert!(matches!(DataFileReader::open(&path), Err(ChronoError::Corruption(_))));
}

#[test]
fn test_read_unsealed_chunk_through_writer_index() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    let writer = write_unsealed(&path);

    let chunk = &writer.chunk_groups()[1].chunks[0];
    let points = DataFileReader::read_unsealed_chunk(&path, chunk).unwrap();

    assert_eq!(points, vec![(4, Value::Int64(40)), (5, Value::Int64(50))]);
}

#[test]
fn test_writer_refuses_writes_after_end_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    let mut writer = write_unsealed(&path);

    writer.end_file(&schema()).unwrap();

    assert!(writer.is_finished());
    assert_eq!(writer.chunk_groups().len(), 2);
    assert!(writer
        .write_chunk_group("root.d0", 9, &[chunk("s0", &[9])])
        .is_err());
    assert!(writer.end_file(&schema()).is_err());
    assert_eq!(DataFileReader::open(&path).unwrap().metadata().chunk_groups.len(), 2);
}

// =============================================================================
// Crash Salvage Tests
// =============================================================================

#[test]
fn test_sealed_file_is_not_crashed() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    write_unsealed(&path).end_file(&schema()).unwrap();

    let restorable = RestorableWriter::open(&path).unwrap();

    assert!(!restorable.has_crashed());
    assert_eq!(restorable.sealed_metadata().unwrap().chunk_groups.len(), 2);
    assert!(restorable.into_writer().is_err());
}

#[test]
fn test_unsealed_file_keeps_all_complete_groups() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    drop(write_unsealed(&path));

    let restorable = RestorableWriter::open(&path).unwrap();

    assert!(restorable.has_crashed());
    assert_eq!(restorable.chunk_groups().len(), 2);
    assert_eq!(restorable.valid_len(), fs::metadata(&path).unwrap().len());
}

#[test]
fn test_torn_group_is_dropped() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    let second_offset = write_unsealed(&path).chunk_groups()[1].offset;
    truncate_by(&path, 3);

    let restorable = RestorableWriter::open(&path).unwrap();

    assert!(restorable.has_crashed());
    assert_eq!(restorable.chunk_groups().len(), 1);
    assert_eq!(restorable.chunk_groups()[0].device, "root.d0");
    assert_eq!(restorable.valid_len(), second_offset);
}

#[test]
fn test_corrupt_group_checksum_stops_scan() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    let second_offset = write_unsealed(&path).chunk_groups()[1].offset;

    // Flip a byte inside the second group's body
    let mut bytes = fs::read(&path).unwrap();
    let target = second_offset as usize + 8;
    bytes[target] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let restorable = RestorableWriter::open(&path).unwrap();
    assert_eq!(restorable.chunk_groups().len(), 1);
}

#[test]
fn test_salvaged_file_can_be_extended_and_sealed() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    drop(write_unsealed(&path));
    truncate_by(&path, 2);

    let mut writer = RestorableWriter::open(&path).unwrap().into_writer().unwrap();
    assert_eq!(writer.chunk_groups().len(), 1);
    writer
        .write_chunk_group("root.d1", 7, &[chunk("s1", &[8])])
        .unwrap();
    writer.end_file(&schema()).unwrap();

    let mut recovering = path.as_os_str().to_owned();
    recovering.push(".recovering");
    assert!(!Path::new(&recovering).exists());

    let mut reader = DataFileReader::open(&path).unwrap();
    let devices: Vec<&str> = reader
        .metadata()
        .chunk_groups
        .iter()
        .map(|g| g.device.as_str())
        .collect();
    assert_eq!(devices, vec!["root.d0", "root.d1"]);
    assert_eq!(
        reader.read_series("root.d1", "s1").unwrap(),
        vec![(7, vec![(8, Value::Int64(80))])]
    );
    assert_eq!(reader.read_series("root.d0", "s0").unwrap()[0].1.len(), 3);
}

#[test]
fn test_damaged_header_starts_over() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    fs::write(&path, b"garbage that is not a data file").unwrap();

    let restorable = RestorableWriter::open(&path).unwrap();
    assert!(restorable.has_crashed());
    assert_eq!(restorable.valid_len(), 0);
    assert!(restorable.chunk_groups().is_empty());

    let mut writer = restorable.into_writer().unwrap();
    writer
        .write_chunk_group("root.d0", 1, &[chunk("s0", &[1])])
        .unwrap();
    writer.end_file(&schema()).unwrap();

    let reader = DataFileReader::open(&path).unwrap();
    assert_eq!(reader.metadata().chunk_groups.len(), 1);
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_flush_uses_one_version_for_all_devices() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("1.tsfile");
    let versions = CountingVersions(AtomicU64::new(10));

    let memtable = MemTable::new();
    memtable.insert_point("root.d1", "s0", 2, Value::Int64(2)).unwrap();
    memtable.insert_point("root.d0", "s0", 1, Value::Int64(1)).unwrap();

    let mut writer = DataFileWriter::create(&path).unwrap();
    let groups = flush_memtable(&memtable, &mut writer, &versions).unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].device, "root.d0");
    assert!(groups.iter().all(|g| g.version == 11));
    assert_eq!(versions.curr_version(), 11);
    assert!(!memtable.is_empty());
}

#[test]
fn test_flush_empty_memtable_issues_no_version() {
    let temp_dir = TempDir::new().unwrap();
    let versions = CountingVersions(AtomicU64::new(0));
    let mut writer = DataFileWriter::create(&temp_dir.path().join("1.tsfile")).unwrap();

    let groups = flush_memtable(&MemTable::new(), &mut writer, &versions).unwrap();

    assert!(groups.is_empty());
    assert_eq!(versions.curr_version(), 0);
}
