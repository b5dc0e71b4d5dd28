//! # Mmap Persistence Tests
//!
//! Restart behavior of the memory-mapped backend:
//!
//! 1. Restart durability after a graceful close, for every index variant
//! 2. Header idempotence across repeated close/reopen cycles
//! 3. Termination without close is never a partially populated store
//! 4. Temporary-mode cleanup
//! 5. Variant and file compatibility checks

use std::path::Path;

use hoard::codec::{I32Codec, I64Codec, StringCodec};
use hoard::{Hoard, IndexKind, StoreError};
use tempfile::tempdir;

const MB: u64 = 1024 * 1024;

fn open_longs(path: &Path, kind: IndexKind) -> Hoard<i64, i64> {
    Hoard::builder()
        .persistent(path)
        .allocate_size(16 * MB)
        .index(kind)
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open()
        .unwrap()
}

// ============================================================================
// Restart durability
// ============================================================================

#[test]
fn restart_round_trip_with_hash_index() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");

    let map = open_longs(&path, IndexKind::Hash);
    map.put(7, &777).unwrap();
    map.put(42, &4242).unwrap();
    map.flush().unwrap();
    map.put(7, &7777).unwrap();
    map.close().unwrap();

    let map = open_longs(&path, IndexKind::Hash);
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&7).unwrap(), Some(7777));
    assert_eq!(map.get(&42).unwrap(), Some(4242));
    assert_eq!(map.get(&0).unwrap(), None);
    map.close().unwrap();
}

#[test]
fn restart_round_trip_for_every_variant() {
    for kind in [
        IndexKind::Hash,
        IndexKind::Segmented { segments: 64 },
        IndexKind::LongPrimitive,
    ] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let map = open_longs(&path, kind);
        for k in 1..=300i64 {
            map.put(k, &(k * 11)).unwrap();
        }
        map.close().unwrap();

        let map = open_longs(&path, kind);
        assert_eq!(map.len(), 300, "{kind:?}");
        for k in 1..=300i64 {
            assert_eq!(map.get(&k).unwrap(), Some(k * 11), "{kind:?}");
        }
        map.close().unwrap();
    }

    // The i32 variant has its own key type.
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");

    let map = Hoard::<i32, i32>::builder()
        .persistent(&path)
        .allocate_size(16 * MB)
        .index(IndexKind::IntPrimitive)
        .key_codec(I32Codec)
        .value_codec(I32Codec)
        .open()
        .unwrap();
    for k in 1..=100i32 {
        map.put(k, &(k * 3)).unwrap();
    }
    map.close().unwrap();

    let map = Hoard::<i32, i32>::builder()
        .persistent(&path)
        .allocate_size(16 * MB)
        .index(IndexKind::IntPrimitive)
        .key_codec(I32Codec)
        .value_codec(I32Codec)
        .open()
        .unwrap();
    assert_eq!(map.len(), 100);
    assert_eq!(map.get(&99).unwrap(), Some(297));
    map.close().unwrap();
}

#[test]
fn restart_with_string_keys_and_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("strings.bin");

    let map = Hoard::<String, String>::builder()
        .persistent(&path)
        .allocate_size(16 * MB)
        .index(IndexKind::Segmented { segments: 16 })
        .key_codec(StringCodec)
        .value_codec(StringCodec)
        .open()
        .unwrap();
    for i in 0..100 {
        map.put(format!("key-{i}"), &format!("value-{i}")).unwrap();
    }
    map.close().unwrap();

    let map = Hoard::<String, String>::builder()
        .persistent(&path)
        .allocate_size(16 * MB)
        .index(IndexKind::Segmented { segments: 16 })
        .key_codec(StringCodec)
        .value_codec(StringCodec)
        .open()
        .unwrap();
    assert_eq!(map.len(), 100);
    assert_eq!(
        map.get(&"key-37".to_string()).unwrap(),
        Some("value-37".to_string())
    );
    map.close().unwrap();
}

#[test]
fn updates_and_removes_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("churn.bin");

    let map = open_longs(&path, IndexKind::Hash);
    for k in 1..=50i64 {
        map.put(k, &k).unwrap();
    }
    for k in 1..=50i64 {
        map.put(k, &(k * 100)).unwrap();
    }
    for k in 26..=50i64 {
        map.remove(&k).unwrap();
    }
    map.close().unwrap();

    let map = open_longs(&path, IndexKind::Hash);
    assert_eq!(map.len(), 25);
    for k in 1..=25i64 {
        assert_eq!(map.get(&k).unwrap(), Some(k * 100));
    }
    for k in 26..=50i64 {
        assert_eq!(map.get(&k).unwrap(), None);
    }

    // The bump allocator never reclaims, so churn grows the data region;
    // new writes continue after the restored offset.
    map.put(1000, &1000).unwrap();
    assert_eq!(map.get(&1000).unwrap(), Some(1000));
    map.close().unwrap();
}

// ============================================================================
// Header idempotence
// ============================================================================

#[test]
fn repeated_close_reopen_cycles_preserve_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cycles.bin");

    let map = open_longs(&path, IndexKind::Segmented { segments: 64 });
    for k in 1..=20i64 {
        map.put(k, &k).unwrap();
    }
    map.close().unwrap();

    for _ in 0..5 {
        let map = open_longs(&path, IndexKind::Segmented { segments: 64 });
        assert_eq!(map.len(), 20);
        for k in 1..=20i64 {
            assert_eq!(map.get(&k).unwrap(), Some(k));
        }
        map.close().unwrap();
    }
}

#[test]
fn empty_store_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.bin");

    let map = open_longs(&path, IndexKind::Hash);
    map.close().unwrap();

    let map = open_longs(&path, IndexKind::Hash);
    assert!(map.is_empty());
    map.close().unwrap();
}

// ============================================================================
// Ungraceful termination
// ============================================================================

#[test]
fn termination_without_close_is_not_reopenable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crash.bin");

    let map = open_longs(&path, IndexKind::Hash);
    map.put(1, &1).unwrap();
    // Simulates the process dying: neither close() nor Drop runs, so no
    // header is ever written.
    std::mem::forget(map);

    let result = Hoard::<i64, i64>::builder()
        .persistent(&path)
        .allocate_size(16 * MB)
        .index(IndexKind::Hash)
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open();

    let err = result.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::IncompatibleFile { .. })
    ));
}

#[test]
fn drop_writes_the_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dropped.bin");

    let map = open_longs(&path, IndexKind::Hash);
    map.put(5, &55).unwrap();
    drop(map);

    let map = open_longs(&path, IndexKind::Hash);
    assert_eq!(map.get(&5).unwrap(), Some(55));
    map.close().unwrap();
}

// ============================================================================
// Temporary mode
// ============================================================================

#[test]
fn temporary_file_removed_at_close() {
    let map = Hoard::<i64, i64>::builder()
        .temporary()
        .allocate_size(10 * MB)
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open()
        .unwrap();

    let path = map.path().unwrap().to_path_buf();
    assert!(path.exists());

    map.put(1, &1).unwrap();
    assert_eq!(map.get(&1).unwrap(), Some(1));
    map.close().unwrap();

    assert!(!path.exists());
}

// ============================================================================
// Compatibility checks
// ============================================================================

#[test]
fn reopen_with_different_variant_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("variant.bin");

    let map = open_longs(&path, IndexKind::Hash);
    map.put(1, &1).unwrap();
    map.close().unwrap();

    let result = Hoard::<i64, i64>::builder()
        .persistent(&path)
        .allocate_size(16 * MB)
        .index(IndexKind::Segmented { segments: 64 })
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open();

    let err = result.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::IncompatibleIndex {
            expected: 1,
            actual: 0
        })
    ));
}

#[test]
fn foreign_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("foreign.bin");
    std::fs::write(&path, b"definitely not a store file").unwrap();

    let result = Hoard::<i64, i64>::builder()
        .persistent(&path)
        .allocate_size(MB)
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open();

    let err = result.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::IncompatibleFile { .. })
    ));
}

#[test]
fn reopen_with_larger_allocate_size_keeps_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("grow.bin");

    let map = Hoard::<i64, i64>::builder()
        .persistent(&path)
        .allocate_size(2 * MB)
        .index(IndexKind::Hash)
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open()
        .unwrap();
    map.put(1, &1).unwrap();
    map.close().unwrap();

    let map = Hoard::<i64, i64>::builder()
        .persistent(&path)
        .allocate_size(8 * MB)
        .index(IndexKind::Hash)
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open()
        .unwrap();
    assert_eq!(map.get(&1).unwrap(), Some(1));
    map.put(2, &2).unwrap();
    map.close().unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 8 * MB);
}
