//! # Concurrent Hash Index
//!
//! The basic index variant: one sharded concurrent map whose values are
//! small copyable [`Locator`] records. Replacement and removal are atomic
//! at the owning shard, which is exactly the critical-section contract the
//! store's put/remove ordering relies on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use eyre::{ensure, Result};

use super::{read_entry, write_entry, Index, Locator, StoreKey};
use crate::codec::Codec;
use crate::config::INDEX_TYPE_HASH;
use crate::memory::raw;

pub struct HashIndex<K> {
    map: DashMap<K, Locator>,
    len: AtomicUsize,
    key_codec: Arc<dyn Codec<K>>,
}

impl<K: StoreKey> HashIndex<K> {
    pub fn new(key_codec: Arc<dyn Codec<K>>, initial_capacity: u32) -> Self {
        Self {
            map: DashMap::with_capacity(initial_capacity as usize),
            len: AtomicUsize::new(0),
            key_codec,
        }
    }
}

impl<K: StoreKey> Index<K> for HashIndex<K> {
    fn index_type(&self) -> u32 {
        INDEX_TYPE_HASH
    }

    fn put_and_get_old(&self, key: K, address: u64, size: u32) -> Result<Option<Locator>> {
        ensure!(address != 0, "address 0 is reserved for absent entries");

        let old = self.map.insert(key, Locator { address, size });
        if old.is_none() {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        Ok(old)
    }

    fn get(&self, key: &K) -> Option<u64> {
        self.map.get(key).map(|entry| entry.value().address)
    }

    fn value_size(&self, key: &K) -> Option<u32> {
        self.map.get(key).map(|entry| entry.value().size)
    }

    fn remove_and_get(&self, key: &K) -> Option<Locator> {
        let removed = self.map.remove(key);
        if let Some((_, locator)) = removed {
            self.len.fetch_sub(1, Ordering::AcqRel);
            Some(locator)
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.clear_with(&mut |_, _| {});
    }

    fn clear_with(&self, release: &mut dyn FnMut(u64, u32)) {
        self.map.retain(|_, locator| {
            release(locator.address, locator.size);
            self.len.fetch_sub(1, Ordering::AcqRel);
            false
        });
    }

    fn for_each(&self, visit: &mut dyn FnMut(&K, u64, u32)) {
        for entry in self.map.iter() {
            let locator = entry.value();
            visit(entry.key(), locator.address, locator.size);
        }
    }

    fn serialized_size(&self) -> Result<usize> {
        let mut total = 4usize;
        for entry in self.map.iter() {
            let key_size = self.key_codec.size_of(entry.key())?;
            total += 4 + key_size as usize + 8 + 4;
        }
        Ok(total)
    }

    fn serialize_with_offsets(&self, address: u64, base_address: u64) -> Result<usize> {
        let mut addr = address + 4;
        let mut count = 0i32;

        for entry in self.map.iter() {
            addr += write_entry(
                addr,
                entry.key(),
                self.key_codec.as_ref(),
                *entry.value(),
                base_address,
            )?;
            count += 1;
        }

        // Entry count is patched last so the written image matches what
        // the iteration actually produced.
        // SAFETY: serialized_size reserved these 4 bytes.
        unsafe { raw::put_i32(address, count) };

        Ok((addr - address) as usize)
    }

    fn deserialize_with_offsets(
        &self,
        address: u64,
        size: usize,
        base_address: u64,
    ) -> Result<()> {
        self.clear();

        // SAFETY: the image is bounded by the header's index_size, which
        // covers the count prefix.
        let count = unsafe { raw::get_i32(address) };
        let end = address + size as u64;
        let mut addr = address + 4;

        for _ in 0..count {
            ensure!(addr < end, "serialized index truncated");
            let (key, locator, consumed) =
                read_entry(addr, self.key_codec.as_ref(), base_address)?;
            addr += consumed;

            if self.map.insert(key, locator).is_none() {
                self.len.fetch_add(1, Ordering::AcqRel);
            }
        }

        Ok(())
    }

    fn close(&self) {
        self.clear();
    }
}
