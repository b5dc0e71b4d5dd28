//! # Store Builder
//!
//! Fluent configuration for [`Hoard`]. Two construction modes:
//!
//! - **Off-heap** (default): values live in anonymous native memory,
//!   bounded by `max_memory`. Nothing survives the process.
//! - **Mmap**: values live in a memory-mapped file, either `persistent`
//!   at a caller path or `temporary` in the OS temp directory. A
//!   persistent file written by a graceful close is reopened by building
//!   with the same codecs and index variant.
//!
//! | Option            | Default        | Applies to |
//! |-------------------|----------------|------------|
//! | max_memory        | 1 GiB          | off-heap   |
//! | allocate_size     | 10 GiB         | mmap       |
//! | index             | Segmented{64}  | both       |
//! | initial_capacity  | 16             | both       |
//! | key/value codec   | required       | both       |
//!
//! Misconfiguration fails `open()` with `StoreError::Config`.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{ensure, Result};
use tracing::debug;

use super::Hoard;
use crate::codec::Codec;
use crate::config::{
    DEFAULT_ALLOCATE_SIZE, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_MEMORY, DEFAULT_SEGMENT_COUNT,
    INDEX_TYPE_INT_PRIMITIVE, INDEX_TYPE_LONG_PRIMITIVE,
};
use crate::error::StoreError;
use crate::index::{HashIndex, Index, SegmentedHashIndex, StoreKey};
use crate::memory::{Allocator, MmapAllocator, MmapMode, SlabAllocator};
use crate::storage::{MmapStorage, OffHeapStorage};

/// Which index variant backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// One concurrent hash map.
    Hash,
    /// Power-of-two array of independently locked tables.
    Segmented { segments: u32 },
    /// Open-addressed primitive arrays; requires `i64` keys.
    LongPrimitive,
    /// Open-addressed primitive arrays; requires `i32` keys.
    IntPrimitive,
}

/// Configures and opens a [`Hoard`].
pub struct Builder<K: StoreKey, V> {
    max_memory: u64,
    allocate_size: u64,
    initial_capacity: u32,
    index: IndexKind,
    mmap: Option<MmapMode>,
    key_codec: Option<Arc<dyn Codec<K>>>,
    value_codec: Option<Arc<dyn Codec<V>>>,
}

impl<K: StoreKey, V> Default for Builder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreKey, V> Builder<K, V> {
    pub fn new() -> Self {
        Self {
            max_memory: DEFAULT_MAX_MEMORY,
            allocate_size: DEFAULT_ALLOCATE_SIZE,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            index: IndexKind::Segmented {
                segments: DEFAULT_SEGMENT_COUNT,
            },
            mmap: None,
            key_codec: None,
            value_codec: None,
        }
    }

    /// Off-heap memory limit in bytes. Ignored in mmap mode.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Pre-allocated file size for mmap mode. Reopening an existing file
    /// with a larger value extends it; a smaller value keeps the existing
    /// length.
    pub fn allocate_size(mut self, bytes: u64) -> Self {
        self.allocate_size = bytes;
        self
    }

    /// Initial capacity hint for the index tables.
    pub fn initial_capacity(mut self, capacity: u32) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Selects the index variant. For a persistent file the variant must
    /// match across sessions.
    pub fn index(mut self, kind: IndexKind) -> Self {
        self.index = kind;
        self
    }

    /// Backs the store with a persistent memory-mapped file.
    pub fn persistent(mut self, path: impl Into<PathBuf>) -> Self {
        self.mmap = Some(MmapMode::Persistent(path.into()));
        self
    }

    /// Backs the store with a temporary memory-mapped file, removed at
    /// close.
    pub fn temporary(mut self) -> Self {
        self.mmap = Some(MmapMode::Temporary);
        self
    }

    pub fn key_codec(mut self, codec: impl Codec<K> + 'static) -> Self {
        self.key_codec = Some(Arc::new(codec));
        self
    }

    pub fn value_codec(mut self, codec: impl Codec<V> + 'static) -> Self {
        self.value_codec = Some(Arc::new(codec));
        self
    }

    fn new_index(&self, key_codec: Arc<dyn Codec<K>>) -> Result<Box<dyn Index<K>>> {
        match self.index {
            IndexKind::Hash => Ok(Box::new(HashIndex::new(key_codec, self.initial_capacity))),
            IndexKind::Segmented { segments } => Ok(Box::new(SegmentedHashIndex::new(
                key_codec,
                segments,
                self.initial_capacity,
            )?)),
            IndexKind::LongPrimitive => {
                let index = K::primitive_index(self.initial_capacity)?;
                ensure!(
                    index.index_type() == INDEX_TYPE_LONG_PRIMITIVE,
                    StoreError::Config("the long primitive index requires i64 keys".into())
                );
                Ok(index)
            }
            IndexKind::IntPrimitive => {
                let index = K::primitive_index(self.initial_capacity)?;
                ensure!(
                    index.index_type() == INDEX_TYPE_INT_PRIMITIVE,
                    StoreError::Config("the int primitive index requires i32 keys".into())
                );
                Ok(index)
            }
        }
    }

    /// Opens the store with the configured settings.
    pub fn open(self) -> Result<Hoard<K, V>> {
        ensure!(
            self.max_memory >= 1,
            StoreError::Config("max_memory must be at least 1 byte".into())
        );
        ensure!(
            self.allocate_size >= 1,
            StoreError::Config("allocate_size must be at least 1 byte".into())
        );
        ensure!(
            self.initial_capacity >= 1,
            StoreError::Config("initial_capacity must be at least 1".into())
        );

        let key_codec = self
            .key_codec
            .clone()
            .ok_or_else(|| StoreError::Config("key_codec is required".into()))?;
        let value_codec = self
            .value_codec
            .clone()
            .ok_or_else(|| StoreError::Config("value_codec is required".into()))?;

        match self.mmap.clone() {
            None => {
                let allocator = Arc::new(SlabAllocator::new(self.max_memory)?);
                let index = self.new_index(key_codec)?;
                let storage = Box::new(OffHeapStorage::new(allocator.clone()));

                Ok(Hoard::assemble(
                    index,
                    storage,
                    allocator as Arc<dyn Allocator>,
                    None,
                    value_codec,
                ))
            }
            Some(mode) => {
                let allocator = Arc::new(MmapAllocator::open(mode, self.allocate_size)?);
                let index = self.new_index(key_codec)?;

                if allocator.is_existing_file() {
                    let header = allocator.read_header()?;

                    ensure!(
                        index.index_type() == header.index_type(),
                        StoreError::IncompatibleIndex {
                            expected: index.index_type(),
                            actual: header.index_type(),
                        }
                    );

                    allocator.restore_offset(header.current_offset());

                    if header.index_size() > 0 {
                        index.deserialize_with_offsets(
                            allocator.base_address() + header.index_offset(),
                            header.index_size() as usize,
                            allocator.base_address(),
                        )?;
                    }

                    debug!(
                        entries = index.len(),
                        offset = header.current_offset(),
                        "restored store from existing file"
                    );
                }

                let storage = Box::new(MmapStorage::new(allocator.clone()));

                Ok(Hoard::assemble(
                    index,
                    storage,
                    allocator.clone() as Arc<dyn Allocator>,
                    Some(allocator),
                    value_codec,
                ))
            }
        }
    }
}
