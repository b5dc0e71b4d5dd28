//! # Store Facade
//!
//! [`Hoard`] composes a codec, an allocator, an index, and a storage
//! engine into the map the caller sees. It owns the one ordering rule the
//! whole design hinges on:
//!
//! ```text
//! put(k, v):
//!   size    = codec.size_of(v)
//!   address = allocator.allocate(size)
//!   codec.encode(address, v)            // on failure: free, propagate
//!   old     = index.put_and_get_old(k, address, size)
//!   if old: decode(old), THEN free(old)
//! ```
//!
//! The new value is fully encoded before the index learns about it, and
//! the old extent is freed only after the index no longer references it,
//! so a concurrent reader sees either the old bytes (not yet freed) or the
//! new bytes (fully written), never recycled memory. The old value is
//! decoded before its free for the same reason.
//!
//! ## Lifecycle
//!
//! `close` is idempotent. For a persistent memory-mapped store it
//! serializes the index behind the data region, writes the file header,
//! and flushes; nothing else produces a reopenable file. `Drop` closes
//! best-effort so the header is written even when the caller forgets.

mod builder;

pub use builder::{Builder, IndexKind};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};
use tracing::debug;

use crate::codec::Codec;
use crate::error::StoreError;
use crate::index::{Index, StoreKey};
use crate::memory::{Allocator, MmapAllocator};
use crate::storage::{MapFileHeader, StorageEngine};

/// Embedded key-value store holding values off the Rust heap.
pub struct Hoard<K: StoreKey, V> {
    index: Box<dyn Index<K>>,
    storage: Box<dyn StorageEngine>,
    allocator: Arc<dyn Allocator>,
    /// Present in mmap mode; used by the persistence paths.
    mmap: Option<Arc<MmapAllocator>>,
    value_codec: Arc<dyn Codec<V>>,
    closed: AtomicBool,
}

/// Point-in-time usage numbers.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub entries: usize,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "entries:{} used:{}/{} available:{}",
            self.entries, self.used_bytes, self.total_bytes, self.available_bytes
        )
    }
}

impl<K: StoreKey, V> Hoard<K, V> {
    /// Starts configuring a new store.
    pub fn builder() -> Builder<K, V> {
        Builder::new()
    }

    pub(crate) fn assemble(
        index: Box<dyn Index<K>>,
        storage: Box<dyn StorageEngine>,
        allocator: Arc<dyn Allocator>,
        mmap: Option<Arc<MmapAllocator>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Self {
        Self {
            index,
            storage,
            allocator,
            mmap,
            value_codec,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        ensure!(
            !self.closed.load(Ordering::Acquire),
            StoreError::AlreadyClosed
        );
        Ok(())
    }

    /// Inserts or replaces the value for `key`; returns the prior value.
    pub fn put(&self, key: K, value: &V) -> Result<Option<V>> {
        self.ensure_open()?;

        let size = self.value_codec.size_of(value)?;
        let address = self.allocator.allocate(size)?;

        let written = match self.value_codec.encode(address, value) {
            Ok(written) => written,
            Err(e) => {
                self.allocator.free(address, size);
                return Err(e);
            }
        };

        let old = match self.index.put_and_get_old(key, address, written) {
            Ok(old) => old,
            Err(e) => {
                // The index was not touched; the prior mapping, if any,
                // stays intact.
                self.allocator.free(address, size);
                return Err(e);
            }
        };

        match old {
            Some(locator) => {
                let prior = self.value_codec.decode(locator.address);
                self.allocator.free(locator.address, locator.size);
                Ok(Some(prior?))
            }
            None => Ok(None),
        }
    }

    /// Looks up the value for `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;

        match self.index.get(key) {
            Some(address) => Ok(Some(self.value_codec.decode(address)?)),
            None => Ok(None),
        }
    }

    /// Removes `key`; returns the value it held.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;

        match self.index.remove_and_get(key) {
            Some(locator) => {
                let prior = self.value_codec.decode(locator.address);
                self.allocator.free(locator.address, locator.size);
                Ok(Some(prior?))
            }
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.index.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry, returning all value memory to the allocator.
    pub fn clear(&self) -> Result<()> {
        self.ensure_open()?;

        let allocator = self.allocator.as_ref();
        self.index
            .clear_with(&mut |address, size| allocator.free(address, size));
        Ok(())
    }

    /// Forces pending writes to durable storage (mmap mode).
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.storage.flush()
    }

    /// Path of the backing file, for memory-mapped stores.
    pub fn path(&self) -> Option<&std::path::Path> {
        self.mmap.as_deref().map(MmapAllocator::path)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.len(),
            used_bytes: self.allocator.used(),
            total_bytes: self.allocator.total(),
            available_bytes: self.allocator.available(),
        }
    }

    /// Closes the store. For a persistent memory-mapped store this is the
    /// graceful-close path: it saves the index and header and flushes, and
    /// is the only way to produce a reopenable file. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(mmap) = &self.mmap {
            if mmap.persistent() {
                self.save_index(mmap)?;
            }
        }

        self.index.close();
        self.storage.close()?;
        self.allocator.close();
        Ok(())
    }

    /// Serializes the index behind the data region and writes the header.
    fn save_index(&self, mmap: &MmapAllocator) -> Result<()> {
        let data_end = self.allocator.used();
        let index_size = self.index.serialized_size()?;

        ensure!(
            data_end + index_size as u64 <= mmap.file_size(),
            StoreError::OutOfSpace {
                requested: index_size as u64,
                available: mmap.file_size().saturating_sub(data_end),
            }
        );

        let base = mmap.base_address();
        let written = self
            .index
            .serialize_with_offsets(base + data_end, base)?;

        let mut header = MapFileHeader::new();
        header.set_index_type(self.index.index_type());
        header.set_entry_count(self.index.len() as u32);
        header.set_current_offset(data_end);
        header.set_index_offset(data_end);
        header.set_index_size(written as u64);
        mmap.write_header(&header);

        self.storage.flush()?;
        debug!(
            entries = self.index.len(),
            index_size = written,
            "saved index for graceful close"
        );
        Ok(())
    }
}

impl<K: StoreKey, V> Drop for Hoard<K, V> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(error = %e, "close during drop failed");
        }
    }
}
