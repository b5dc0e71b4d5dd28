//! # Primitive-Key Index
//!
//! Open addressing over three parallel primitive arrays (`keys`,
//! `addresses`, `sizes`) with linear probing. No boxing, no per-entry
//! allocation: a million entries cost about 20 bytes each.
//!
//! ## Slot encoding
//!
//! Slot state lives in the key itself: `0` marks an empty slot and the
//! type's minimum value marks a tombstone. Both are therefore rejected as
//! user keys at the API boundary.
//!
//! ## Probing
//!
//! Lookup scans from `spread(key) & (capacity - 1)` until it finds the key
//! or an empty slot. Insert additionally remembers the first tombstone and
//! reuses it when the scan reaches empty. The table doubles at a 0.75 load
//! factor, dropping tombstones on the way, so probe chains stay short and
//! every scan terminates.
//!
//! ## Concurrency
//!
//! One `RwLock` guards the whole table: lookups share it, mutations and
//! resize take it exclusively. `spread` is the MurmurHash3 finalizer (or
//! its 32-bit analog), which disperses sequential keys well enough that
//! clustering is not a practical concern.

use eyre::{ensure, Result};
use parking_lot::RwLock;

use super::{Index, Locator};
use crate::config::{INDEX_TYPE_INT_PRIMITIVE, INDEX_TYPE_LONG_PRIMITIVE};
use crate::error::StoreError;
use crate::memory::raw;

mod sealed {
    pub trait Sealed {}
    impl Sealed for i64 {}
    impl Sealed for i32 {}
}

/// Fixed-width integer key usable with [`PrimitiveIndex`].
pub trait PrimitiveKey:
    Copy + Eq + std::hash::Hash + Send + Sync + 'static + sealed::Sealed
{
    const EMPTY: Self;
    const TOMBSTONE: Self;
    const WIRE_SIZE: u64;
    const INDEX_TYPE: u32;

    /// High-dispersion hash of the key.
    fn spread(self) -> u64;

    fn as_i64(self) -> i64;

    /// # Safety
    ///
    /// `addr` must be writable for `WIRE_SIZE` bytes.
    unsafe fn write_wire(addr: u64, key: Self);

    /// # Safety
    ///
    /// `addr` must be readable for `WIRE_SIZE` bytes.
    unsafe fn read_wire(addr: u64) -> Self;
}

impl PrimitiveKey for i64 {
    const EMPTY: Self = 0;
    const TOMBSTONE: Self = i64::MIN;
    const WIRE_SIZE: u64 = 8;
    const INDEX_TYPE: u32 = INDEX_TYPE_LONG_PRIMITIVE;

    /// MurmurHash3 64-bit finalizer.
    fn spread(self) -> u64 {
        let mut h = self as u64;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        h
    }

    fn as_i64(self) -> i64 {
        self
    }

    unsafe fn write_wire(addr: u64, key: Self) {
        raw::put_i64(addr, key)
    }

    unsafe fn read_wire(addr: u64) -> Self {
        raw::get_i64(addr)
    }
}

impl PrimitiveKey for i32 {
    const EMPTY: Self = 0;
    const TOMBSTONE: Self = i32::MIN;
    const WIRE_SIZE: u64 = 4;
    const INDEX_TYPE: u32 = INDEX_TYPE_INT_PRIMITIVE;

    /// MurmurHash3 32-bit finalizer.
    fn spread(self) -> u64 {
        let mut h = self as u32;
        h ^= h >> 16;
        h = h.wrapping_mul(0x85eb_ca6b);
        h ^= h >> 13;
        h = h.wrapping_mul(0xc2b2_ae35);
        h ^= h >> 16;
        h as u64
    }

    fn as_i64(self) -> i64 {
        self as i64
    }

    unsafe fn write_wire(addr: u64, key: Self) {
        raw::put_i32(addr, key)
    }

    unsafe fn read_wire(addr: u64) -> Self {
        raw::get_i32(addr)
    }
}

struct Table<P> {
    keys: Vec<P>,
    addresses: Vec<u64>,
    sizes: Vec<u32>,
    len: usize,
    threshold: usize,
}

impl<P: PrimitiveKey> Table<P> {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            keys: vec![P::EMPTY; capacity],
            addresses: vec![0; capacity],
            sizes: vec![0; capacity],
            len: 0,
            threshold: capacity / 4 * 3,
        }
    }

    fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Slot holding `key`, or None when absent.
    fn probe(&self, key: P) -> Option<usize> {
        let mask = self.capacity() - 1;
        let mut i = (key.spread() as usize) & mask;
        let start = i;

        loop {
            let k = self.keys[i];
            if k == key {
                return Some(i);
            }
            if k == P::EMPTY {
                return None;
            }
            i = (i + 1) & mask;
            if i == start {
                return None;
            }
        }
    }

    /// Slot to install `key` into: its current slot, the first tombstone
    /// passed, or the empty slot that ended the scan.
    fn find_slot(&self, key: P) -> usize {
        let mask = self.capacity() - 1;
        let mut i = (key.spread() as usize) & mask;
        let start = i;
        let mut first_tombstone = None;

        loop {
            let k = self.keys[i];
            if k == key {
                return i;
            }
            if k == P::EMPTY {
                return first_tombstone.unwrap_or(i);
            }
            if k == P::TOMBSTONE && first_tombstone.is_none() {
                first_tombstone = Some(i);
            }
            i = (i + 1) & mask;
            if i == start {
                // Only reachable on a table full of tombstones; the
                // threshold resize keeps a live table below capacity.
                return first_tombstone.unwrap_or(i);
            }
        }
    }

    fn insert(&mut self, key: P, address: u64, size: u32) -> Option<Locator> {
        if self.len >= self.threshold {
            self.resize();
        }

        let slot = self.find_slot(key);
        let prior = self.keys[slot];
        let was_present = prior != P::EMPTY && prior != P::TOMBSTONE;
        let old = Locator {
            address: self.addresses[slot],
            size: self.sizes[slot],
        };

        self.keys[slot] = key;
        self.addresses[slot] = address;
        self.sizes[slot] = size;

        if was_present {
            Some(old)
        } else {
            self.len += 1;
            None
        }
    }

    /// Doubles capacity and re-inserts live slots, dropping tombstones.
    fn resize(&mut self) {
        let mut grown = Table::with_capacity(self.capacity() * 2);

        for i in 0..self.capacity() {
            let k = self.keys[i];
            if k != P::EMPTY && k != P::TOMBSTONE {
                let slot = grown.find_slot(k);
                grown.keys[slot] = k;
                grown.addresses[slot] = self.addresses[i];
                grown.sizes[slot] = self.sizes[i];
                grown.len += 1;
            }
        }

        *self = grown;
    }
}

/// Open-addressed index over parallel primitive arrays.
pub struct PrimitiveIndex<P: PrimitiveKey> {
    table: RwLock<Table<P>>,
    initial_capacity: usize,
}

/// Primitive index for `i64` keys.
pub type LongPrimitiveIndex = PrimitiveIndex<i64>;
/// Primitive index for `i32` keys.
pub type IntPrimitiveIndex = PrimitiveIndex<i32>;

impl<P: PrimitiveKey> PrimitiveIndex<P> {
    pub fn with_capacity(capacity: u32) -> Self {
        let capacity = (capacity as usize).max(1).next_power_of_two();
        Self {
            table: RwLock::new(Table::with_capacity(capacity)),
            initial_capacity: capacity,
        }
    }

    fn check_key(key: P) -> Result<()> {
        ensure!(
            key != P::EMPTY && key != P::TOMBSTONE,
            StoreError::InvalidKey(key.as_i64())
        );
        Ok(())
    }
}

impl<P: PrimitiveKey> Index<P> for PrimitiveIndex<P> {
    fn index_type(&self) -> u32 {
        P::INDEX_TYPE
    }

    fn put_and_get_old(&self, key: P, address: u64, size: u32) -> Result<Option<Locator>> {
        Self::check_key(key)?;
        ensure!(address != 0, "address 0 is reserved for absent entries");

        Ok(self.table.write().insert(key, address, size))
    }

    fn get(&self, key: &P) -> Option<u64> {
        if *key == P::EMPTY || *key == P::TOMBSTONE {
            return None;
        }

        let table = self.table.read();
        table.probe(*key).map(|slot| table.addresses[slot])
    }

    fn value_size(&self, key: &P) -> Option<u32> {
        if *key == P::EMPTY || *key == P::TOMBSTONE {
            return None;
        }

        let table = self.table.read();
        table.probe(*key).map(|slot| table.sizes[slot])
    }

    fn remove_and_get(&self, key: &P) -> Option<Locator> {
        if *key == P::EMPTY || *key == P::TOMBSTONE {
            return None;
        }

        let mut table = self.table.write();
        let slot = table.probe(*key)?;
        let old = Locator {
            address: table.addresses[slot],
            size: table.sizes[slot],
        };

        table.keys[slot] = P::TOMBSTONE;
        table.addresses[slot] = 0;
        table.sizes[slot] = 0;
        table.len -= 1;

        Some(old)
    }

    fn len(&self) -> usize {
        self.table.read().len
    }

    fn clear(&self) {
        self.clear_with(&mut |_, _| {});
    }

    fn clear_with(&self, release: &mut dyn FnMut(u64, u32)) {
        let mut table = self.table.write();

        for i in 0..table.capacity() {
            let k = table.keys[i];
            if k != P::EMPTY && k != P::TOMBSTONE {
                release(table.addresses[i], table.sizes[i]);
            }
        }

        *table = Table::with_capacity(self.initial_capacity);
    }

    fn for_each(&self, visit: &mut dyn FnMut(&P, u64, u32)) {
        let table = self.table.read();

        for i in 0..table.capacity() {
            let k = table.keys[i];
            if k != P::EMPTY && k != P::TOMBSTONE {
                visit(&k, table.addresses[i], table.sizes[i]);
            }
        }
    }

    fn serialized_size(&self) -> Result<usize> {
        let table = self.table.read();
        Ok(4 + table.len * (P::WIRE_SIZE as usize + 12))
    }

    fn serialize_with_offsets(&self, address: u64, base_address: u64) -> Result<usize> {
        let table = self.table.read();
        let mut addr = address;

        // SAFETY: the caller sized the destination with serialized_size.
        unsafe {
            raw::put_i32(addr, table.len as i32);
            addr += 4;

            for i in 0..table.capacity() {
                let k = table.keys[i];
                if k != P::EMPTY && k != P::TOMBSTONE {
                    P::write_wire(addr, k);
                    addr += P::WIRE_SIZE;
                    raw::put_i64(addr, (table.addresses[i] - base_address) as i64);
                    addr += 8;
                    raw::put_i32(addr, table.sizes[i] as i32);
                    addr += 4;
                }
            }
        }

        Ok((addr - address) as usize)
    }

    fn deserialize_with_offsets(
        &self,
        address: u64,
        size: usize,
        base_address: u64,
    ) -> Result<()> {
        let mut table = self.table.write();
        *table = Table::with_capacity(self.initial_capacity);

        // SAFETY: the image is bounded by the header's index_size.
        let count = unsafe { raw::get_i32(address) };
        let end = address + size as u64;
        let mut addr = address + 4;

        for _ in 0..count {
            ensure!(addr < end, "serialized index truncated");

            // SAFETY: as above; each entry is WIRE_SIZE + 12 bytes.
            let (key, offset, value_size) = unsafe {
                let key = P::read_wire(addr);
                addr += P::WIRE_SIZE;
                let offset = raw::get_i64(addr);
                addr += 8;
                let value_size = raw::get_i32(addr);
                addr += 4;
                (key, offset, value_size)
            };

            ensure!(
                key != P::EMPTY && key != P::TOMBSTONE,
                StoreError::Codec(format!(
                    "serialized index holds reserved key {}",
                    key.as_i64()
                ))
            );

            table.insert(key, base_address + offset as u64, value_size as u32);
        }

        Ok(())
    }

    fn close(&self) {
        self.clear();
    }
}
