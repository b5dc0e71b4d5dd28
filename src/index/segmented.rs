//! # Segmented Hash Index
//!
//! A power-of-two array of independently locked hash tables. A key's
//! segment is `hash(key) & (N - 1)`, so writers on different segments
//! proceed in parallel and the write lock each mutation takes is the
//! atomicity boundary the store relies on. The global length lives in an
//! atomic updated while the segment's write guard is held, which keeps
//! `len` linearizable with the mutation that changed it.
//!
//! ## Persistence
//!
//! Entries are serialized in one contiguous run; segment identity is not
//! persisted. Deserialize validates the persisted segment count against
//! this instance's and re-buckets every entry by the current hash, since
//! hash seeds differ between runs.

use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::RwLock;

use super::{read_entry, write_entry, Index, Locator, StoreKey};
use crate::codec::Codec;
use crate::config::INDEX_TYPE_SEGMENTED;
use crate::error::StoreError;
use crate::memory::raw;

struct Segment<K> {
    map: RwLock<HashMap<K, Locator>>,
}

pub struct SegmentedHashIndex<K> {
    segments: Box<[Segment<K>]>,
    mask: u64,
    len: AtomicUsize,
    hasher: DefaultHashBuilder,
    key_codec: Arc<dyn Codec<K>>,
}

impl<K: StoreKey> SegmentedHashIndex<K> {
    pub fn new(
        key_codec: Arc<dyn Codec<K>>,
        segment_count: u32,
        initial_capacity: u32,
    ) -> Result<Self> {
        ensure!(
            segment_count > 0 && segment_count.is_power_of_two(),
            StoreError::Config(format!(
                "segment count must be a power of two, got {}",
                segment_count
            ))
        );

        let per_segment = (initial_capacity as usize / segment_count as usize).max(1);
        let segments = (0..segment_count)
            .map(|_| Segment {
                map: RwLock::new(HashMap::with_capacity(per_segment)),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            segments,
            mask: segment_count as u64 - 1,
            len: AtomicUsize::new(0),
            hasher: DefaultHashBuilder::default(),
            key_codec,
        })
    }

    fn segment(&self, key: &K) -> &Segment<K> {
        let index = (self.hasher.hash_one(key) & self.mask) as usize;
        &self.segments[index]
    }
}

impl<K: StoreKey> Index<K> for SegmentedHashIndex<K> {
    fn index_type(&self) -> u32 {
        INDEX_TYPE_SEGMENTED
    }

    fn put_and_get_old(&self, key: K, address: u64, size: u32) -> Result<Option<Locator>> {
        ensure!(address != 0, "address 0 is reserved for absent entries");

        let segment = self.segment(&key);
        let mut map = segment.map.write();
        let old = map.insert(key, Locator { address, size });
        if old.is_none() {
            // Counted under the write guard so len stays linearizable with
            // the insert it reflects.
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        Ok(old)
    }

    fn get(&self, key: &K) -> Option<u64> {
        self.segment(key)
            .map
            .read()
            .get(key)
            .map(|locator| locator.address)
    }

    fn value_size(&self, key: &K) -> Option<u32> {
        self.segment(key)
            .map
            .read()
            .get(key)
            .map(|locator| locator.size)
    }

    fn remove_and_get(&self, key: &K) -> Option<Locator> {
        let segment = self.segment(key);
        let mut map = segment.map.write();
        let removed = map.remove(key);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.clear_with(&mut |_, _| {});
    }

    fn clear_with(&self, release: &mut dyn FnMut(u64, u32)) {
        for segment in self.segments.iter() {
            let mut map = segment.map.write();
            for locator in map.values() {
                release(locator.address, locator.size);
            }
            self.len.fetch_sub(map.len(), Ordering::AcqRel);
            map.clear();
        }
    }

    fn for_each(&self, visit: &mut dyn FnMut(&K, u64, u32)) {
        for segment in self.segments.iter() {
            let map = segment.map.read();
            for (key, locator) in map.iter() {
                visit(key, locator.address, locator.size);
            }
        }
    }

    fn serialized_size(&self) -> Result<usize> {
        // segment count + total entry count
        let mut total = 8usize;

        for segment in self.segments.iter() {
            let map = segment.map.read();
            for key in map.keys() {
                let key_size = self.key_codec.size_of(key)?;
                total += 4 + key_size as usize + 8 + 4;
            }
        }
        Ok(total)
    }

    fn serialize_with_offsets(&self, address: u64, base_address: u64) -> Result<usize> {
        // SAFETY: serialized_size reserved the two count fields.
        unsafe { raw::put_i32(address, self.segments.len() as i32) };

        let mut addr = address + 8;
        let mut count = 0i32;

        for segment in self.segments.iter() {
            let map = segment.map.read();
            for (key, locator) in map.iter() {
                addr += write_entry(addr, key, self.key_codec.as_ref(), *locator, base_address)?;
                count += 1;
            }
        }

        // SAFETY: as above.
        unsafe { raw::put_i32(address + 4, count) };

        Ok((addr - address) as usize)
    }

    fn deserialize_with_offsets(
        &self,
        address: u64,
        size: usize,
        base_address: u64,
    ) -> Result<()> {
        // SAFETY: the image is bounded by the header's index_size, which
        // covers both count fields.
        let (segment_count, total) =
            unsafe { (raw::get_i32(address), raw::get_i32(address + 4)) };

        ensure!(
            segment_count as usize == self.segments.len(),
            StoreError::IncompatibleIndex {
                expected: self.segments.len() as u32,
                actual: segment_count as u32,
            }
        );

        self.clear();

        let end = address + size as u64;
        let mut addr = address + 8;

        for _ in 0..total {
            ensure!(addr < end, "serialized index truncated");
            let (key, locator, consumed) =
                read_entry(addr, self.key_codec.as_ref(), base_address)?;
            addr += consumed;

            // Re-bucket by the current hash; the persisted run carries no
            // segment identity.
            let segment = self.segment(&key);
            if segment.map.write().insert(key, locator).is_none() {
                self.len.fetch_add(1, Ordering::AcqRel);
            }
        }

        Ok(())
    }

    fn close(&self) {
        self.clear();
    }
}
