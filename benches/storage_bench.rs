//! Benchmarks for ChronoDB storage-core operations
//!
//! - Version allocation with periodic checkpoints
//! - Tombstone appends (each one fsync'd)
//! - Resource index serialization
//! - Memtable inserts and flush into a data file
//! - WAL replay during recovery

use std::sync::atomic::{AtomicU64, Ordering};

use chronodb::memtable::MemTable;
use chronodb::recovery::{log_node_identifier, LogReplayer};
use chronodb::schema::FileSchema;
use chronodb::storage::{flush_memtable, DataFileWriter};
use chronodb::tombstone::{Deletion, Modification, TombstoneLog};
use chronodb::wal::{InsertRecord, LogNodeManager, Operation};
use chronodb::{
    DataType, FileResource, FileVersionController, Result, SeriesPath, Value, VersionController,
    WalSyncStrategy,
};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;

struct CountingVersions(AtomicU64);

impl VersionController for CountingVersions {
    fn next_version(&self) -> Result<u64> {
        Ok(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn curr_version(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

fn bench_next_version(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let versions = FileVersionController::open(temp_dir.path()).unwrap();

    c.bench_function("version_next_interval_100", |b| {
        b.iter(|| black_box(versions.next_version().unwrap()))
    });
}

fn bench_tombstone_append(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let log = TombstoneLog::for_data_file(&temp_dir.path().join("000001.tsfile"));
    let path = SeriesPath::new("root.sg.d0", "s0");
    let mut version = 0;

    c.bench_function("tombstone_append", |b| {
        b.iter(|| {
            version += 1;
            let deletion = Modification::from(Deletion::new(path.clone(), version, 1_000));
            log.write(black_box(&deletion)).unwrap();
        })
    });
}

fn bench_resource_serialize(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let mut resource = FileResource::new(temp_dir.path().join("000001.tsfile"));
    for d in 0..1_000 {
        let device = format!("root.sg.device{}", d);
        resource.update_start_time(&device, d);
        resource.update_end_time(&device, d + 10_000);
    }

    c.bench_function("resource_serialize_1k_devices", |b| {
        b.iter(|| resource.serialize().unwrap())
    });
}

fn bench_memtable_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable_flush");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("10_devices_x_1k_points", |b| {
        b.iter_batched(
            || {
                let memtable = MemTable::new();
                for d in 0..10 {
                    for t in 0..1_000 {
                        memtable
                            .insert_point(&format!("root.sg.d{}", d), "s0", t, Value::Int64(t))
                            .unwrap();
                    }
                }
                (TempDir::new().unwrap(), memtable)
            },
            |(dir, memtable)| {
                let versions = CountingVersions(AtomicU64::new(0));
                let mut writer = DataFileWriter::create(&dir.path().join("1.tsfile")).unwrap();
                flush_memtable(&memtable, &mut writer, &versions).unwrap();
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

fn bench_wal_replay(c: &mut Criterion) {
    const ROWS: i64 = 5_000;

    let mut schema = FileSchema::new();
    schema.register("s0", DataType::Int64);

    let mut group = c.benchmark_group("wal_replay");
    group.throughput(Throughput::Elements(ROWS as u64));

    group.bench_function("5k_inserts", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let manager =
                    LogNodeManager::new(dir.path().join("wal"), WalSyncStrategy::EveryNEntries {
                        count: 1_000,
                    })
                    .unwrap();
                let file = dir.path().join("000001.tsfile");
                let node = manager.get_node(&log_node_identifier("seq-", &file)).unwrap();
                for t in 0..ROWS {
                    node.write(Operation::Insert(InsertRecord::single(
                        "root.sg.d0",
                        t,
                        "s0",
                        t.to_string(),
                    )))
                    .unwrap();
                }
                node.force_sync().unwrap();
                (dir, manager, FileResource::new(file))
            },
            |(_dir, manager, mut resource)| {
                let memtable = MemTable::new();
                let versions = CountingVersions(AtomicU64::new(0));
                LogReplayer::new(
                    &manager,
                    "seq-",
                    &mut resource,
                    &versions,
                    &schema,
                    &memtable,
                    false,
                )
                .replay_logs()
                .unwrap()
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_next_version,
    bench_tombstone_append,
    bench_resource_serialize,
    bench_memtable_flush,
    bench_wal_replay
);
criterion_main!(benches);
