//! # Memory Module
//!
//! Off-heap memory management for the store: the raw address-based
//! primitives and the two allocator backends.
//!
//! ## Architecture
//!
//! Every value the store holds lives outside the Rust heap, addressed by a
//! plain `u64`. An [`Allocator`] turns a size request into such an address
//! and takes `(address, size)` back on release. Two backends implement the
//! contract:
//!
//! - [`SlabAllocator`]: anonymous native memory, grouped into size classes
//!   with per-class free lists. Used by the off-heap storage engine.
//! - [`MmapAllocator`]: a memory-mapped file advanced by a monotonic bump
//!   offset. `free` is a no-op; space is reclaimed only by discarding the
//!   file. Used by the mmap storage engine, optionally persistent.
//!
//! ## Address zero
//!
//! Address `0` is reserved as the "absent" marker throughout the index
//! layer. Neither backend ever returns it: the system allocator hands out
//! non-null pointers and the mmap backend starts past the file header.
//!
//! ## Module Organization
//!
//! - [`raw`]: unchecked load/store/copy primitives at integer addresses
//! - `slab`: size-classed pooling allocator
//! - `mmap`: file-backed bump allocator

pub mod raw;

mod mmap;
mod slab;

pub use mmap::{MmapAllocator, MmapMode};
pub use slab::SlabAllocator;

use eyre::Result;

/// Hands out addresses into a backing region and takes them back.
///
/// `allocate` never returns address `0`. Counters are exact for the slab
/// backend and reflect the bump offset for the mmap backend.
pub trait Allocator: Send + Sync {
    /// Returns an address writable for exactly `size` bytes.
    ///
    /// Fails with `StoreError::InvalidSize` for a zero size,
    /// `StoreError::OutOfSpace` when the configured limit would be
    /// exceeded, and `StoreError::AllocationFailed` when the OS refuses.
    fn allocate(&self, size: u32) -> Result<u64>;

    /// Releases a prior allocation. `size` must agree with the issuing
    /// `allocate` call; the store guarantees this by pairing every free
    /// with the size recorded in the index.
    fn free(&self, address: u64, size: u32);

    /// Bytes currently handed out (slab) or consumed by the bump offset
    /// (mmap).
    fn used(&self) -> u64;

    /// Bytes backed by the allocator in total.
    fn total(&self) -> u64;

    /// Bytes still available before the configured limit.
    fn available(&self) -> u64;

    /// Releases every outstanding allocation and the underlying region.
    /// Idempotent.
    fn close(&self);
}
