//! # Storage Module
//!
//! The storage engine binds an allocator to its backing medium. The
//! allocator decides *where* bytes go; the engine owns *what* they live on
//! and the operations that only make sense for the medium: flushing to
//! durable storage and releasing the region at close.
//!
//! Two engines cover the two allocator backends:
//!
//! - [`OffHeapStorage`]: anonymous native memory. Flush is a no-op;
//!   close releases every pooled block through the allocator.
//! - [`MmapStorage`]: a memory-mapped file. Flush forces the mapping to
//!   disk; close flushes and releases the file handles.
//!
//! [`header::MapFileHeader`] defines the on-disk header that makes a
//! memory-mapped file reopenable.

mod header;

pub use header::MapFileHeader;

use std::sync::Arc;

use eyre::Result;

use crate::memory::{Allocator, MmapAllocator, SlabAllocator};

/// Medium-level operations over an allocator's backing region.
pub trait StorageEngine: Send + Sync {
    /// Forces pending writes to durable storage. No-op for off-heap
    /// memory.
    fn flush(&self) -> Result<()>;

    /// Releases the backing region. Idempotent.
    fn close(&self) -> Result<()>;

    /// Total bytes the region can hold.
    fn capacity(&self) -> u64;
}

/// Storage engine over anonymous native memory.
pub struct OffHeapStorage {
    allocator: Arc<SlabAllocator>,
}

impl OffHeapStorage {
    pub fn new(allocator: Arc<SlabAllocator>) -> Self {
        Self { allocator }
    }
}

impl StorageEngine for OffHeapStorage {
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.allocator.close();
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.allocator.used() + self.allocator.available()
    }
}

/// Storage engine over a memory-mapped file.
pub struct MmapStorage {
    allocator: Arc<MmapAllocator>,
}

impl MmapStorage {
    pub fn new(allocator: Arc<MmapAllocator>) -> Self {
        Self { allocator }
    }
}

impl StorageEngine for MmapStorage {
    fn flush(&self) -> Result<()> {
        self.allocator.flush()
    }

    fn close(&self) -> Result<()> {
        self.allocator.close();
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.allocator.file_size()
    }
}
