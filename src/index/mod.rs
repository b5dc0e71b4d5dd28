//! # Index Module
//!
//! An index maps user keys to the `(address, size)` extent of their
//! encoded value inside the region. It never holds references into value
//! bytes, only the locator pair, so the storage layer stays free to treat
//! values as opaque.
//!
//! ## Atomicity rule
//!
//! `put_and_get_old` and `remove_and_get` are each a single critical
//! section: read the old pair, install (or erase) the new one, return the
//! old. The store frees old memory only *after* the index update returns,
//! so a concurrent reader either sees the pre-update address (still live,
//! because its free has not run) or the post-update address (fully encoded
//! before the index was touched). A separate get-then-put pair would let
//! two writers free the same extent twice; the combined operations are the
//! only mutation path the store uses.
//!
//! ## Variants
//!
//! - [`HashIndex`]: one concurrent hash map, replacement is an atomic
//!   shard-level swap. The simplest choice for mixed workloads.
//! - [`SegmentedHashIndex`]: a power-of-two array of lock-guarded tables;
//!   writers on different segments never interact.
//! - [`LongPrimitiveIndex`] / [`IntPrimitiveIndex`]: open-addressed
//!   parallel primitive arrays for integer keys; a fraction of the memory
//!   of a boxed map at the cost of two reserved sentinel key values.
//!
//! ## Persistence
//!
//! Every variant serializes to a relative-offset form: entry addresses are
//! written as `address - base`, because the mapping base changes between
//! runs. `deserialize_with_offsets` re-adds the current base.

mod hash;
mod primitive;
mod segmented;

pub use hash::HashIndex;
pub use primitive::{IntPrimitiveIndex, LongPrimitiveIndex, PrimitiveIndex, PrimitiveKey};
pub use segmented::SegmentedHashIndex;

use std::hash::Hash;

use eyre::Result;

use crate::codec::Codec;
use crate::error::StoreError;
use crate::memory::raw;

/// Where an encoded value lives inside the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub address: u64,
    pub size: u32,
}

/// Key requirements for the store.
///
/// Implemented for the built-in key types; custom key types implement it
/// with an empty body. The `primitive_index` hook is how the fixed-width
/// integer keys opt into the open-addressed index variants.
pub trait StoreKey: Eq + Hash + Clone + Send + Sync + 'static {
    /// Builds the open-addressed primitive index for this key type.
    ///
    /// Only `i64` and `i32` provide one; every other key type fails with a
    /// configuration error.
    fn primitive_index(_capacity: u32) -> Result<Box<dyn Index<Self>>>
    where
        Self: Sized,
    {
        eyre::bail!(StoreError::Config(
            "primitive index variants require i64 or i32 keys".into()
        ))
    }
}

impl StoreKey for i64 {
    fn primitive_index(capacity: u32) -> Result<Box<dyn Index<Self>>> {
        Ok(Box::new(LongPrimitiveIndex::with_capacity(capacity)))
    }
}

impl StoreKey for i32 {
    fn primitive_index(capacity: u32) -> Result<Box<dyn Index<Self>>> {
        Ok(Box::new(IntPrimitiveIndex::with_capacity(capacity)))
    }
}

impl StoreKey for i8 {}
impl StoreKey for i16 {}
impl StoreKey for String {}
impl StoreKey for Vec<u8> {}

/// Maps keys to value locators.
///
/// All operations are thread-safe. `clear` and `close` are defined under
/// concurrency but callers are expected to quiesce first.
pub trait Index<K>: Send + Sync {
    /// The variant tag persisted in the file header.
    fn index_type(&self) -> u32;

    /// Installs `(address, size)`; returns the prior locator if the key
    /// was present. The caller owns freeing the prior extent.
    fn put_and_get_old(&self, key: K, address: u64, size: u32) -> Result<Option<Locator>>;

    /// Prior-address form of [`Index::put_and_get_old`], returning 0 when
    /// the key was absent. Retained for single-threaded callers; the
    /// combined form is what the store uses.
    fn put(&self, key: K, address: u64, size: u32) -> Result<u64> {
        Ok(self
            .put_and_get_old(key, address, size)?
            .map(|old| old.address)
            .unwrap_or(0))
    }

    fn get(&self, key: &K) -> Option<u64>;

    fn value_size(&self, key: &K) -> Option<u32>;

    /// Erases the key and returns its locator in one critical section.
    fn remove_and_get(&self, key: &K) -> Option<Locator>;

    fn remove(&self, key: &K) -> Option<u64> {
        self.remove_and_get(key).map(|old| old.address)
    }

    fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);

    /// Invokes `release` on every live locator, then clears. Lets the
    /// store return all value memory to its allocator in one pass.
    fn clear_with(&self, release: &mut dyn FnMut(u64, u32));

    fn for_each(&self, visit: &mut dyn FnMut(&K, u64, u32));

    /// Exact byte count `serialize_with_offsets` will write.
    fn serialized_size(&self) -> Result<usize>;

    /// Writes every entry at `address`, storing `entry.address -
    /// base_address` instead of absolute addresses. Returns bytes written.
    fn serialize_with_offsets(&self, address: u64, base_address: u64) -> Result<usize>;

    /// Rebuilds the index from a serialized image, adding `base_address`
    /// to each stored offset.
    fn deserialize_with_offsets(&self, address: u64, size: usize, base_address: u64)
        -> Result<()>;

    /// Releases auxiliary resources. Idempotent.
    fn close(&self);
}

/// Serialized entry shape shared by the keyed hash variants:
/// `[i32 key_size][key bytes][i64 relative_offset][i32 value_size]`.
pub(crate) fn write_entry<K>(
    address: u64,
    key: &K,
    key_codec: &dyn Codec<K>,
    locator: Locator,
    base_address: u64,
) -> Result<u64> {
    let key_size = key_codec.size_of(key)?;
    let mut addr = address;

    // SAFETY: the caller sized the destination with serialized_size, which
    // accounts for exactly these fields.
    unsafe {
        raw::put_i32(addr, key_size as i32);
        addr += 4;
        addr += key_codec.encode(addr, key)? as u64;
        raw::put_i64(addr, (locator.address - base_address) as i64);
        addr += 8;
        raw::put_i32(addr, locator.size as i32);
        addr += 4;
    }

    Ok(addr - address)
}

/// Reads one entry written by [`write_entry`]; returns the key, locator,
/// and bytes consumed.
pub(crate) fn read_entry<K>(
    address: u64,
    key_codec: &dyn Codec<K>,
    base_address: u64,
) -> Result<(K, Locator, u64)> {
    let mut addr = address;

    // SAFETY: the caller bounds the image by the header's index_size.
    let (key, locator) = unsafe {
        let key_size = raw::get_i32(addr);
        addr += 4;
        let key = key_codec.decode(addr)?;
        addr += key_size as u64;
        let offset = raw::get_i64(addr);
        addr += 8;
        let size = raw::get_i32(addr);
        addr += 4;

        (
            key,
            Locator {
                address: base_address + offset as u64,
                size: size as u32,
            },
        )
    };

    Ok((key, locator, addr - address))
}
