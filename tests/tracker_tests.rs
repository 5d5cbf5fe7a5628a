//! Tests for the Query File Reference Tracker
//!
//! These tests verify:
//! - One shared reference per job, file and category
//! - Ending a job releases exactly what it took
//! - Concurrent registrations by one job are counted once

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use chronodb::query::{FileReferenceCounter, QueryFileTracker};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (Arc<FileReferenceCounter>, QueryFileTracker) {
    let counter = Arc::new(FileReferenceCounter::new());
    let tracker = QueryFileTracker::new(Arc::clone(&counter));
    (counter, tracker)
}

// =============================================================================
// Counter Tests
// =============================================================================

#[test]
fn test_counter_increment_decrement() {
    let counter = FileReferenceCounter::new();
    let file = Path::new("/data/1.tsfile");

    counter.increment(file, true);
    counter.increment(file, true);
    counter.increment(file, false);
    assert_eq!(counter.reference_count(file, true), 2);
    assert_eq!(counter.reference_count(file, false), 1);

    counter.decrement(file, true);
    counter.decrement(file, false);
    assert_eq!(counter.reference_count(file, true), 1);
    assert_eq!(counter.reference_count(file, false), 0);
    assert!(counter.is_referenced(file));

    counter.decrement(file, true);
    assert!(!counter.is_referenced(file));
}

#[test]
fn test_counter_decrement_unknown_is_ignored() {
    let counter = FileReferenceCounter::new();
    let file = Path::new("/data/1.tsfile");

    counter.decrement(file, true);

    assert_eq!(counter.reference_count(file, true), 0);
}

// =============================================================================
// Tracker Tests
// =============================================================================

#[test]
fn test_job_ids_are_unique() {
    let (_, tracker) = setup();
    let a = tracker.allocate_job();
    let b = tracker.allocate_job();

    assert_ne!(a, b);
    assert_eq!(tracker.active_jobs(), 0);
}

#[test]
fn test_repeated_registration_counts_once() {
    let (counter, tracker) = setup();
    let job = tracker.allocate_job();
    let file = Path::new("/data/1.tsfile");

    tracker.register_usage(job, file, true);
    tracker.register_usage(job, file, true);
    tracker.register_usage(job, file, true);

    assert_eq!(counter.reference_count(file, true), 1);
    assert_eq!(tracker.active_jobs(), 1);
}

#[test]
fn test_sealed_and_unsealed_counted_separately() {
    let (counter, tracker) = setup();
    let job = tracker.allocate_job();
    let file = Path::new("/data/1.tsfile");

    tracker.register_usage(job, file, true);
    tracker.register_usage(job, file, false);

    assert_eq!(counter.reference_count(file, true), 1);
    assert_eq!(counter.reference_count(file, false), 1);
}

#[test]
fn test_jobs_share_counters() {
    let (counter, tracker) = setup();
    let file = Path::new("/data/1.tsfile");
    let first = tracker.allocate_job();
    let second = tracker.allocate_job();

    tracker.register_usage(first, file, true);
    tracker.register_usage(second, file, true);
    assert_eq!(counter.reference_count(file, true), 2);

    tracker.end_job(first);
    assert_eq!(counter.reference_count(file, true), 1);
    assert_eq!(tracker.active_jobs(), 1);

    tracker.end_job(second);
    assert!(!counter.is_referenced(file));
    assert_eq!(tracker.active_jobs(), 0);
}

#[test]
fn test_end_job_releases_every_file() {
    let (counter, tracker) = setup();
    let job = tracker.allocate_job();
    let files: Vec<String> = (0..5).map(|i| format!("/data/{}.tsfile", i)).collect();

    for (i, file) in files.iter().enumerate() {
        tracker.register_usage(job, Path::new(file), i % 2 == 0);
    }
    tracker.end_job(job);

    for file in &files {
        assert!(!counter.is_referenced(Path::new(file)));
    }
}

#[test]
fn test_end_unknown_job_is_noop() {
    let (counter, tracker) = setup();
    let job = tracker.allocate_job();
    let file = Path::new("/data/1.tsfile");
    tracker.register_usage(job, file, true);

    tracker.end_job(job + 100);
    tracker.end_job(job);
    tracker.end_job(job);

    assert_eq!(counter.reference_count(file, true), 0);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_registration_by_one_job_counts_once() {
    for _ in 0..20 {
        let (counter, tracker) = setup();
        let tracker = Arc::new(tracker);
        let job = tracker.allocate_job();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    tracker.register_usage(job, Path::new("/data/hot.tsfile"), true);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.reference_count(Path::new("/data/hot.tsfile"), true), 1);
        tracker.end_job(job);
        assert!(!counter.is_referenced(Path::new("/data/hot.tsfile")));
    }
}

#[test]
fn test_concurrent_jobs_balance_out() {
    let (counter, tracker) = setup();
    let tracker = Arc::new(tracker);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                for _ in 0..50 {
                    let job = tracker.allocate_job();
                    tracker.register_usage(job, Path::new("/data/a.tsfile"), true);
                    tracker.register_usage(job, Path::new("/data/b.tsfile"), false);
                    tracker.end_job(job);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!counter.is_referenced(Path::new("/data/a.tsfile")));
    assert!(!counter.is_referenced(Path::new("/data/b.tsfile")));
    assert_eq!(tracker.active_jobs(), 0);
}
