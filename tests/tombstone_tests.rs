//! Tests for the Tombstone Log
//!
//! These tests verify:
//! - Records are durable and read back in order
//! - Abort markers cancel the most recent record
//! - A malformed line fails the whole read
//! - Deletion coverage rules against data versions

use std::fs;
use std::path::PathBuf;

use chronodb::tombstone::{Deletion, Modification, TombstoneLog};
use chronodb::{ChronoError, SeriesPath};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_log() -> (TempDir, TombstoneLog) {
    let temp_dir = TempDir::new().unwrap();
    let log = TombstoneLog::for_data_file(&temp_dir.path().join("000001.tsfile"));
    (temp_dir, log)
}

fn deletion(device: &str, measurement: &str, version: u64, timestamp: i64) -> Modification {
    Modification::from(Deletion::new(
        SeriesPath::new(device, measurement),
        version,
        timestamp,
    ))
}

// =============================================================================
// Write / Read Tests
// =============================================================================

#[test]
fn test_companion_path_has_mods_suffix() {
    let (dir, log) = setup_log();
    assert_eq!(log.path(), dir.path().join("000001.tsfile.mods"));
    assert_eq!(
        TombstoneLog::companion_path(&PathBuf::from("/data/a.tsfile")),
        PathBuf::from("/data/a.tsfile.mods")
    );
}

#[test]
fn test_read_missing_log_is_empty() {
    let (_dir, log) = setup_log();
    assert!(log.read().unwrap().is_empty());
}

#[test]
fn test_write_then_read_in_order() {
    let (_dir, log) = setup_log();
    let records = vec![
        deletion("root.d0", "s0", 1, 10),
        deletion("root.d1", "s1", 2, 20),
        deletion("root.sg.d2", "s2", 3, -5),
    ];
    for record in &records {
        log.write(record).unwrap();
    }

    assert_eq!(log.read().unwrap(), records);
}

#[test]
fn test_line_format() {
    let (_dir, log) = setup_log();
    log.write(&deletion("root.sg.d0", "s0", 7, 100)).unwrap();

    let content = fs::read_to_string(log.path()).unwrap();
    assert_eq!(content, "DELETION,root.sg.d0.s0,7,100\n");
}

#[test]
fn test_records_survive_reopen() {
    let (dir, log) = setup_log();
    log.write(&deletion("root.d0", "s0", 1, 10)).unwrap();
    log.close().unwrap();
    drop(log);

    let reopened = TombstoneLog::for_data_file(&dir.path().join("000001.tsfile"));
    reopened.write(&deletion("root.d0", "s0", 2, 20)).unwrap();

    assert_eq!(reopened.read().unwrap().len(), 2);
}

#[test]
fn test_close_is_idempotent() {
    let (_dir, log) = setup_log();
    log.close().unwrap();
    log.write(&deletion("root.d0", "s0", 1, 1)).unwrap();
    log.close().unwrap();
    log.close().unwrap();

    assert_eq!(log.read().unwrap().len(), 1);
}

#[test]
fn test_path_with_separator_rejected() {
    let (_dir, log) = setup_log();
    let result = log.write(&deletion("root,d0", "s0", 1, 1));

    assert!(result.is_err());
    assert!(log.read().unwrap().is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn test_failed_append_leaves_nothing_for_next_write() {
    let full_device = std::path::Path::new("/dev/full");
    if !full_device.exists() {
        return;
    }
    let (_dir, log) = setup_log();
    std::os::unix::fs::symlink(full_device, log.path()).unwrap();

    assert!(log.write(&deletion("root.d0", "s0", 1, 10)).is_err());

    fs::remove_file(log.path()).unwrap();
    log.write(&deletion("root.d0", "s0", 2, 20)).unwrap();

    assert_eq!(log.read().unwrap(), vec![deletion("root.d0", "s0", 2, 20)]);
    assert_eq!(
        fs::read_to_string(log.path()).unwrap(),
        "DELETION,root.d0.s0,2,20\n"
    );
}

// =============================================================================
// Abort Tests
// =============================================================================

#[test]
fn test_abort_cancels_last_record() {
    let (_dir, log) = setup_log();
    let a = deletion("root.d0", "s0", 1, 10);
    let b = deletion("root.d0", "s1", 2, 10);

    log.write(&a).unwrap();
    log.write(&b).unwrap();
    log.abort().unwrap();

    assert_eq!(log.read().unwrap(), vec![a]);
}

#[test]
fn test_consecutive_aborts_cancel_in_reverse() {
    let (_dir, log) = setup_log();
    let a = deletion("root.d0", "s0", 1, 10);
    let c = deletion("root.d0", "s2", 4, 10);

    log.write(&a).unwrap();
    log.write(&deletion("root.d0", "s1", 2, 10)).unwrap();
    log.write(&deletion("root.d0", "s1", 3, 10)).unwrap();
    log.abort().unwrap();
    log.abort().unwrap();
    log.write(&c).unwrap();

    assert_eq!(log.read().unwrap(), vec![a, c]);
}

#[test]
fn test_leading_abort_is_noop() {
    let (_dir, log) = setup_log();
    let a = deletion("root.d0", "s0", 1, 10);

    log.abort().unwrap();
    log.write(&a).unwrap();

    assert_eq!(log.read().unwrap(), vec![a]);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_malformed_line_fails_whole_read() {
    let (_dir, log) = setup_log();
    log.write(&deletion("root.d0", "s0", 1, 10)).unwrap();

    let mut content = fs::read_to_string(log.path()).unwrap();
    content.push_str("DELETION,root.d0.s0,notanumber,10\n");
    fs::write(log.path(), content).unwrap();

    assert!(matches!(log.read(), Err(ChronoError::Corruption(_))));
}

#[test]
fn test_wrong_field_count_is_corruption() {
    let (_dir, log) = setup_log();
    fs::write(log.path(), "DELETION,root.d0.s0,1\n").unwrap();

    assert!(matches!(log.read(), Err(ChronoError::Corruption(_))));
}

#[test]
fn test_unknown_record_type_is_corruption() {
    let (_dir, log) = setup_log();
    fs::write(log.path(), "INSERTION,root.d0.s0,1,2\n").unwrap();

    assert!(matches!(log.read(), Err(ChronoError::Corruption(_))));
}

#[test]
fn test_decode_matches_encode() {
    let record = deletion("root.sg.d0", "temperature", 12, -3);
    let line = record.encode();

    assert_eq!(Modification::decode(&line).unwrap(), record);
    assert_eq!(record.to_string(), line);
}

// =============================================================================
// Coverage Tests
// =============================================================================

#[test]
fn test_deletion_covers_older_data_up_to_bound() {
    let path = SeriesPath::new("root.d0", "s0");
    let d = Deletion::new(path.clone(), 10, 100);

    assert!(d.covers(&path, 9, 100));
    assert!(d.covers(&path, 0, -50));
    assert!(!d.covers(&path, 9, 101));
    assert!(!d.covers(&path, 10, 50));
    assert!(!d.covers(&path, 11, 50));
    assert!(!d.covers(&SeriesPath::new("root.d0", "s1"), 9, 50));
}
