//! Tests for the MemTable and schema types
//!
//! These tests verify:
//! - Row inserts, overwrites and type checks
//! - Range deletions of buffered points
//! - Snapshots and size accounting
//! - Parsing of textual values and series paths
//! - The schema log

use chronodb::memtable::MemTable;
use chronodb::schema::{FileSchema, SchemaLog};
use chronodb::{ChronoError, DataType, SeriesPath, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn row(values: &[(&str, i64)]) -> Vec<(String, Value)> {
    values
        .iter()
        .map(|(m, v)| (m.to_string(), Value::Int64(*v)))
        .collect()
}

fn timestamps(memtable: &MemTable, device: &str, measurement: &str) -> Vec<i64> {
    memtable
        .query(device, measurement)
        .map(|chunk| chunk.iter().map(|(t, _)| *t).collect())
        .unwrap_or_default()
}

// =============================================================================
// Insert Tests
// =============================================================================

#[test]
fn test_insert_and_query() {
    let memtable = MemTable::new();
    memtable.insert("root.d0", 2, &row(&[("s0", 20), ("s1", 21)])).unwrap();
    memtable.insert("root.d0", 1, &row(&[("s0", 10)])).unwrap();

    let chunk = memtable.query("root.d0", "s0").unwrap();
    assert_eq!(chunk.data_type, DataType::Int64);
    assert_eq!(chunk.points, vec![(1, Value::Int64(10)), (2, Value::Int64(20))]);
    assert_eq!(chunk.start_time(), Some(1));
    assert_eq!(chunk.end_time(), Some(2));
    assert_eq!(memtable.point_count(), 3);
    assert!(memtable.query("root.d0", "s9").is_none());
}

#[test]
fn test_insert_same_timestamp_overwrites() {
    let memtable = MemTable::new();
    memtable.insert_point("root.d0", "s0", 5, Value::Int64(1)).unwrap();
    let size = memtable.size();
    memtable.insert_point("root.d0", "s0", 5, Value::Int64(2)).unwrap();

    assert_eq!(memtable.size(), size);
    assert_eq!(memtable.query("root.d0", "s0").unwrap().points, vec![(5, Value::Int64(2))]);
}

#[test]
fn test_insert_type_mismatch_rejects_whole_row() {
    let memtable = MemTable::new();
    memtable.insert_point("root.d0", "s0", 1, Value::Int64(1)).unwrap();

    let mixed = vec![
        ("s1".to_string(), Value::Int64(7)),
        ("s0".to_string(), Value::Text("oops".to_string())),
    ];
    let result = memtable.insert("root.d0", 2, &mixed);

    assert!(matches!(result, Err(ChronoError::TypeMismatch { .. })));
    assert!(memtable.query("root.d0", "s1").is_none());
}

#[test]
fn test_insert_empty_row_is_noop() {
    let memtable = MemTable::new();
    memtable.insert("root.d0", 1, &[]).unwrap();

    assert!(memtable.is_empty());
    assert!(memtable.devices().is_empty());
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_removes_points_up_to_bound() {
    let memtable = MemTable::new();
    for t in 0..10 {
        memtable.insert_point("root.d0", "s0", t, Value::Int64(t)).unwrap();
    }

    assert_eq!(memtable.delete("root.d0", "s0", 4), 5);
    assert_eq!(timestamps(&memtable, "root.d0", "s0"), vec![5, 6, 7, 8, 9]);
}

#[test]
fn test_delete_everything_drops_device() {
    let memtable = MemTable::new();
    memtable.insert_point("root.d0", "s0", 1, Value::Int64(1)).unwrap();

    assert_eq!(memtable.delete("root.d0", "s0", i64::MAX), 1);
    assert!(memtable.is_empty());
    assert_eq!(memtable.size(), 0);
}

#[test]
fn test_delete_unknown_series_is_zero() {
    let memtable = MemTable::new();
    memtable.insert_point("root.d0", "s0", 1, Value::Int64(1)).unwrap();

    assert_eq!(memtable.delete("root.d1", "s0", 10), 0);
    assert_eq!(memtable.delete("root.d0", "s1", 10), 0);
    assert_eq!(memtable.point_count(), 1);
}

#[test]
fn test_delete_leaves_other_measurements() {
    let memtable = MemTable::new();
    memtable.insert("root.d0", 1, &row(&[("s0", 1), ("s1", 1)])).unwrap();

    memtable.delete("root.d0", "s0", 1);

    assert!(memtable.query("root.d0", "s0").is_none());
    assert_eq!(timestamps(&memtable, "root.d0", "s1"), vec![1]);
}

// =============================================================================
// Snapshot and Size Tests
// =============================================================================

#[test]
fn test_snapshot_is_ordered() {
    let memtable = MemTable::new();
    memtable.insert("root.d1", 3, &row(&[("s1", 1), ("s0", 2)])).unwrap();
    memtable.insert("root.d0", 1, &row(&[("s0", 3)])).unwrap();

    let snapshot = memtable.snapshot();
    let devices: Vec<&str> = snapshot.iter().map(|(d, _)| d.as_str()).collect();
    assert_eq!(devices, vec!["root.d0", "root.d1"]);

    let measurements: Vec<&str> = snapshot[1].1.iter().map(|c| c.measurement.as_str()).collect();
    assert_eq!(measurements, vec!["s0", "s1"]);
}

#[test]
fn test_end_time_and_flush_threshold() {
    let memtable = MemTable::new();
    memtable.insert("root.d0", 7, &row(&[("s0", 1)])).unwrap();
    memtable.insert("root.d0", 3, &row(&[("s1", 1)])).unwrap();

    assert_eq!(memtable.end_time("root.d0"), Some(7));
    assert_eq!(memtable.end_time("root.d1"), None);
    assert!(memtable.should_flush(1));
    assert!(!memtable.should_flush(usize::MAX));

    memtable.clear();
    assert!(memtable.is_empty());
    assert_eq!(memtable.size(), 0);
}

// =============================================================================
// Value and Path Parsing Tests
// =============================================================================

#[test]
fn test_value_parse_by_type() {
    assert_eq!(Value::parse("s", DataType::Boolean, "TRUE").unwrap(), Value::Boolean(true));
    assert_eq!(Value::parse("s", DataType::Int32, "-12").unwrap(), Value::Int32(-12));
    assert_eq!(Value::parse("s", DataType::Int64, "9").unwrap(), Value::Int64(9));
    assert_eq!(Value::parse("s", DataType::Double, "1.5").unwrap(), Value::Double(1.5));
    assert_eq!(
        Value::parse("s", DataType::Text, "a,b").unwrap(),
        Value::Text("a,b".to_string())
    );
}

#[test]
fn test_value_parse_mismatch() {
    let result = Value::parse("s0", DataType::Int32, "abc");
    assert!(matches!(result, Err(ChronoError::TypeMismatch { .. })));
    assert!(Value::parse("s0", DataType::Boolean, "yes").is_err());
}

#[test]
fn test_series_path_parse() {
    let path: SeriesPath = "root.sg.d0.s0".parse().unwrap();
    assert_eq!(path, SeriesPath::new("root.sg.d0", "s0"));
    assert_eq!(path.to_string(), "root.sg.d0.s0");

    assert!("nodots".parse::<SeriesPath>().is_err());
    assert!("root.".parse::<SeriesPath>().is_err());
}

#[test]
fn test_data_type_names() {
    for data_type in [
        DataType::Boolean,
        DataType::Int32,
        DataType::Int64,
        DataType::Float,
        DataType::Double,
        DataType::Text,
    ] {
        assert_eq!(data_type.to_string().parse::<DataType>().unwrap(), data_type);
        assert_eq!(DataType::from_code(data_type.code()).unwrap(), data_type);
    }
    assert!(DataType::from_code(42).is_err());
}

// =============================================================================
// Schema Log Tests
// =============================================================================

#[test]
fn test_schema_log_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let log = SchemaLog::open(temp_dir.path());
    assert!(log.load().unwrap().is_empty());

    log.append("s0", DataType::Int64).unwrap();
    log.append("s1", DataType::Text).unwrap();

    let schema = SchemaLog::open(temp_dir.path()).load().unwrap();
    let mut expected = FileSchema::new();
    expected.register("s0", DataType::Int64);
    expected.register("s1", DataType::Text);
    assert_eq!(schema, expected);
}

#[test]
fn test_schema_log_rejects_separator() {
    let temp_dir = TempDir::new().unwrap();
    let log = SchemaLog::open(temp_dir.path());

    assert!(log.append("bad,name", DataType::Int64).is_err());
    assert!(log.load().unwrap().is_empty());
}
