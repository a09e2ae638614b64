/// Integration tests for record files covering direct writes, streamed
/// datasets, argument groups and completion markers.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use blockflow_core::{Args, Arg, Records, Value};
use blockflow_store::{StreamingCache, Target, TargetStatus};

// ============================================================================
// Test Helpers
// ============================================================================

/// Create a unique temp directory for each test.
fn test_data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("blockflow-store-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn target_in(dir: &PathBuf, block: &str) -> Target {
    Target::for_block(dir, "script", block, "rec")
}

// ============================================================================
// Direct writes
// ============================================================================

#[test]
fn write_then_load_symbols() {
    let dir = test_data_dir();
    let target = target_in(&dir, "A");

    target.write(&Records::new().with("x", 2).with("y", vec![1.0, 4.0, 9.0])).unwrap();
    target.commit().unwrap();

    let loaded = target.load().unwrap();
    assert_eq!(loaded["x"], Value::Int(2));
    assert_eq!(loaded["y"].as_floats(), Some(&[1.0, 4.0, 9.0][..]));
    assert!(loaded.is_complete());
    assert!(loaded.args().is_none());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn later_writes_overwrite_same_symbol_only() {
    let dir = test_data_dir();
    let target = target_in(&dir, "B");

    target.write(&Records::new().with("x", 1).with("keep", "yes")).unwrap();
    target.write(&Records::new().with("x", 3)).unwrap();

    let loaded = target.load().unwrap();
    assert_eq!(loaded["x"], Value::Int(3));
    assert_eq!(loaded["keep"], Value::Text("yes".into()));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn args_load_as_nested_group() {
    let dir = test_data_dir();
    let target = target_in(&dir, "sim4-A");

    let mut args = Args::new();
    args.insert("param".into(), Arg::from(4));
    target.write_args(&args).unwrap();
    target.write(&Records::new().with("y", vec![4.0, 8.0, 12.0])).unwrap();

    let loaded = target.load().unwrap();
    assert_eq!(loaded.args().unwrap()["param"], Value::Int(4));
    assert_eq!(loaded.len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

// ============================================================================
// Streaming
// ============================================================================

#[test]
fn streaming_flushes_before_end_and_keeps_every_row() {
    let dir = test_data_dir();
    let target = target_in(&dir, "stream");

    // 8-byte floats under a 40-byte budget -> 5 rows per buffer.
    let mut cache = StreamingCache::new(&target, 40, Duration::from_secs(300));
    let n = 23;
    for i in 0..n {
        cache.add_records(Records::new().with("time", i as f64)).unwrap();
    }
    assert_eq!(cache.capacity_of("time"), Some(5));
    let before_final = cache.flush_count();
    assert!(before_final >= 1, "expected an intermediate flush");

    cache.flush().unwrap();
    assert_eq!(cache.rows_written(), n);

    let loaded = target.load().unwrap();
    let rows = loaded["time"].as_list().unwrap();
    assert_eq!(rows.len(), n);
    assert_eq!(rows[0], Value::Float(0.0));
    assert_eq!(rows[n - 1], Value::Float((n - 1) as f64));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn streamed_and_direct_symbols_coexist() {
    let dir = test_data_dir();
    let target = target_in(&dir, "mixed");

    let mut cache = StreamingCache::new(&target, 1_000_000, Duration::from_secs(300));
    for i in 0..5 {
        cache
            .add_records(Records::new().with("series", vec![i as f64, 1.0]).with("step", i))
            .unwrap();
    }
    target.write(&Records::new().with("xavg", 0.5)).unwrap();
    cache.flush().unwrap();
    target.commit().unwrap();

    let loaded = target.load().unwrap();
    assert_eq!(loaded["series"].len(), 5);
    assert_eq!(loaded["step"].len(), 5);
    assert_eq!(loaded["xavg"], Value::Float(0.5));
    assert_eq!(target.status().unwrap(), TargetStatus::Complete);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn uncommitted_stream_reads_as_partial() {
    let dir = test_data_dir();
    let target = target_in(&dir, "crashed");

    let mut cache = StreamingCache::new(&target, 1_000_000, Duration::from_secs(300));
    cache.add("v", Value::Int(1)).unwrap();
    cache.add("v", Value::Int(2)).unwrap();
    cache.flush().unwrap();

    assert!(target.exists());
    assert_eq!(target.status().unwrap(), TargetStatus::Partial);
    let loaded = target.load().unwrap();
    assert!(!loaded.is_complete());
    assert_eq!(loaded["v"].len(), 2);

    std::fs::remove_dir_all(&dir).ok();
}
