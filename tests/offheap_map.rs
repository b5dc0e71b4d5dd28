//! # Off-Heap Store Functional Tests
//!
//! Single-threaded behavior of the off-heap backend across codecs and
//! index variants:
//!
//! 1. Round-trip, update, and delete semantics
//! 2. Size accounting and `is_empty`
//! 3. Clear returning memory to the allocator
//! 4. Primitive-index sentinel rejection
//! 5. Variable-length and nullable payloads

use hoard::codec::{
    BoolCodec, BytesCodec, F64Codec, I32Codec, I64Codec, NullableStringCodec, StringCodec,
};
use hoard::{Hoard, IndexKind, StoreError};

fn long_store(kind: IndexKind) -> Hoard<i64, i64> {
    Hoard::builder()
        .max_memory(1024 * 1024)
        .index(kind)
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open()
        .unwrap()
}

// ============================================================================
// Round-trip / update / delete
// ============================================================================

#[test]
fn basic_long_to_long() {
    let map = long_store(IndexKind::LongPrimitive);

    assert_eq!(map.put(1, &100).unwrap(), None);
    assert_eq!(map.put(2, &200).unwrap(), None);
    assert_eq!(map.put(1, &150).unwrap(), Some(100));

    assert_eq!(map.get(&1).unwrap(), Some(150));
    assert_eq!(map.get(&2).unwrap(), Some(200));
    assert_eq!(map.get(&3).unwrap(), None);

    assert_eq!(map.remove(&2).unwrap(), Some(200));
    assert_eq!(map.len(), 1);
    assert!(!map.contains_key(&2).unwrap());

    map.close().unwrap();
}

#[test]
fn same_behavior_across_index_variants() {
    for kind in [
        IndexKind::Hash,
        IndexKind::Segmented { segments: 64 },
        IndexKind::LongPrimitive,
    ] {
        let map = long_store(kind);

        for k in 1..=500i64 {
            assert_eq!(map.put(k, &(k * 2)).unwrap(), None, "{kind:?}");
        }
        assert_eq!(map.len(), 500);

        for k in 1..=500i64 {
            assert_eq!(map.get(&k).unwrap(), Some(k * 2), "{kind:?}");
        }

        for k in (1..=500i64).step_by(2) {
            assert_eq!(map.remove(&k).unwrap(), Some(k * 2), "{kind:?}");
        }
        assert_eq!(map.len(), 250);

        map.close().unwrap();
    }
}

#[test]
fn string_round_trip_with_segmented_index() {
    let map = Hoard::builder()
        .max_memory(1024 * 1024)
        .index(IndexKind::Segmented { segments: 64 })
        .key_codec(StringCodec)
        .value_codec(StringCodec)
        .open()
        .unwrap();

    assert_eq!(map.put("hello".into(), &"world".to_string()).unwrap(), None);
    assert_eq!(
        map.put("hello".into(), &"HELLO".to_string()).unwrap(),
        Some("world".to_string())
    );
    assert_eq!(map.get(&"hello".to_string()).unwrap(), Some("HELLO".to_string()));
    assert_eq!(map.len(), 1);
    assert_eq!(map.remove(&"missing".to_string()).unwrap(), None);

    map.close().unwrap();
}

#[test]
fn update_to_different_size_class() {
    let map = Hoard::builder()
        .max_memory(1024 * 1024)
        .key_codec(I64Codec)
        .value_codec(StringCodec)
        .open()
        .unwrap();

    let short = "x".to_string();
    let long = "y".repeat(5000);

    map.put(1, &short).unwrap();
    assert_eq!(map.put(1, &long).unwrap(), Some(short.clone()));
    assert_eq!(map.put(1, &short).unwrap(), Some(long));
    assert_eq!(map.get(&1).unwrap(), Some(short));
    assert_eq!(map.len(), 1);
}

// ============================================================================
// Codec coverage
// ============================================================================

#[test]
fn fixed_width_value_codecs() {
    let doubles = Hoard::<i64, f64>::builder()
        .max_memory(64 * 1024)
        .key_codec(I64Codec)
        .value_codec(F64Codec)
        .open()
        .unwrap();
    doubles.put(1, &3.75).unwrap();
    assert_eq!(doubles.get(&1).unwrap(), Some(3.75));

    let flags = Hoard::<i32, bool>::builder()
        .max_memory(64 * 1024)
        .index(IndexKind::IntPrimitive)
        .key_codec(I32Codec)
        .value_codec(BoolCodec)
        .open()
        .unwrap();
    flags.put(5, &true).unwrap();
    assert_eq!(flags.get(&5).unwrap(), Some(true));
}

#[test]
fn nullable_string_values() {
    let map = Hoard::<i64, Option<String>>::builder()
        .max_memory(64 * 1024)
        .key_codec(I64Codec)
        .value_codec(NullableStringCodec)
        .open()
        .unwrap();

    map.put(1, &None).unwrap();
    map.put(2, &Some("present".to_string())).unwrap();

    assert_eq!(map.get(&1).unwrap(), Some(None));
    assert_eq!(map.get(&2).unwrap(), Some(Some("present".to_string())));
    assert_eq!(map.get(&3).unwrap(), None);
}

#[test]
fn byte_vector_values() {
    let map = Hoard::<i64, Vec<u8>>::builder()
        .max_memory(1024 * 1024)
        .key_codec(I64Codec)
        .value_codec(BytesCodec)
        .open()
        .unwrap();

    let blob = (0..=255u8).collect::<Vec<_>>();
    map.put(1, &blob).unwrap();
    assert_eq!(map.get(&1).unwrap(), Some(blob));
    map.put(2, &Vec::new()).unwrap();
    assert_eq!(map.get(&2).unwrap(), Some(Vec::new()));
}

// ============================================================================
// Size accounting and memory
// ============================================================================

#[test]
fn size_tracks_net_puts_minus_removes() {
    let map = long_store(IndexKind::Segmented { segments: 16 });
    assert!(map.is_empty());

    for k in 1..=20i64 {
        map.put(k, &k).unwrap();
    }
    map.put(1, &99).unwrap();
    assert_eq!(map.len(), 20);

    for k in 1..=5i64 {
        map.remove(&k).unwrap();
    }
    map.remove(&999).unwrap();
    assert_eq!(map.len(), 15);

    map.clear().unwrap();
    assert!(map.is_empty());
}

#[test]
fn clear_returns_all_memory() {
    let map = Hoard::builder()
        .max_memory(1024 * 1024)
        .index(IndexKind::Hash)
        .key_codec(StringCodec)
        .value_codec(BytesCodec)
        .open()
        .unwrap();

    let baseline = map.stats().used_bytes;
    for i in 0..200 {
        map.put(format!("key-{i}"), &vec![i as u8; 100]).unwrap();
    }
    assert!(map.stats().used_bytes > baseline);

    map.clear().unwrap();
    assert_eq!(map.stats().used_bytes, baseline);
    assert_eq!(map.stats().entries, 0);
}

#[test]
fn remove_returns_memory() {
    let map = long_store(IndexKind::LongPrimitive);

    let baseline = map.stats().used_bytes;
    map.put(1, &1).unwrap();
    map.put(2, &2).unwrap();
    map.remove(&1).unwrap();
    map.remove(&2).unwrap();

    assert_eq!(map.stats().used_bytes, baseline);
}

#[test]
fn out_of_memory_is_reported_and_recoverable() {
    let map = Hoard::builder()
        .max_memory(64)
        .index(IndexKind::LongPrimitive)
        .key_codec(I64Codec)
        .value_codec(I64Codec)
        .open()
        .unwrap();

    // Each 8-byte value occupies a 16-byte class block.
    for k in 1..=4i64 {
        map.put(k, &k).unwrap();
    }
    let err = map.put(5, &5).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::OutOfSpace { .. })
    ));

    // Freeing an entry makes room again.
    map.remove(&1).unwrap();
    map.put(5, &5).unwrap();
    assert_eq!(map.len(), 4);
}

// ============================================================================
// Primitive index sentinels
// ============================================================================

#[test]
fn long_primitive_rejects_sentinel_keys() {
    let map = long_store(IndexKind::LongPrimitive);

    let err = map.put(0, &1).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::InvalidKey(0))
    ));

    let err = map.put(i64::MIN, &1).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::InvalidKey(_))
    ));

    // Lookups of sentinels simply miss.
    assert_eq!(map.get(&0).unwrap(), None);
    assert_eq!(map.remove(&i64::MIN).unwrap(), None);

    // A failed put must not leak the prepared allocation.
    assert_eq!(map.stats().used_bytes, 0);
}

#[test]
fn int_primitive_rejects_sentinel_keys() {
    let map = Hoard::<i32, i32>::builder()
        .max_memory(64 * 1024)
        .index(IndexKind::IntPrimitive)
        .key_codec(I32Codec)
        .value_codec(I32Codec)
        .open()
        .unwrap();

    assert!(map.put(0, &1).is_err());
    assert!(map.put(i32::MIN, &1).is_err());
    map.put(1, &1).unwrap();
    assert_eq!(map.len(), 1);
}

// ============================================================================
// Hash-index keys that look like sentinels are fine
// ============================================================================

#[test]
fn hash_index_accepts_zero_key() {
    let map = long_store(IndexKind::Hash);

    map.put(0, &42).unwrap();
    assert_eq!(map.get(&0).unwrap(), Some(42));
}
