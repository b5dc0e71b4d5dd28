//! # Hoard - Embedded Off-Heap Key-Value Store
//!
//! Hoard holds very large working sets outside the Rust heap: values live
//! in anonymous native memory or a memory-mapped file, addressed through a
//! pluggable index that maps keys to `(address, size)` extents. The
//! memory-mapped backend persists across process restarts: a graceful
//! close serializes the index into the file and a reopen re-attaches
//! without rescanning values.
//!
//! ## Quick Start
//!
//! ```ignore
//! use hoard::{Hoard, IndexKind};
//! use hoard::codec::{I64Codec, StringCodec};
//!
//! let map = Hoard::builder()
//!     .max_memory(256 * 1024 * 1024)
//!     .index(IndexKind::Segmented { segments: 64 })
//!     .key_codec(I64Codec)
//!     .value_codec(StringCodec)
//!     .open()?;
//!
//! map.put(7, &"seven".to_string())?;
//! assert_eq!(map.get(&7)?, Some("seven".to_string()));
//! map.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Public API (Hoard)           │
//! ├─────────────────────────────────────┤
//! │   Index (Hash / Segmented / Prim)   │
//! ├──────────────────┬──────────────────┤
//! │  Codec (values)  │  Storage engine  │
//! ├──────────────────┴──────────────────┤
//! │  Allocator (Slab / Mmap bump)       │
//! ├─────────────────────────────────────┤
//! │  Raw memory / memory-mapped file    │
//! └─────────────────────────────────────┘
//! ```
//!
//! A `put` runs: size the value, allocate, encode, swap the index entry
//! atomically, free the old extent. The index swap is the linearization
//! point; memory is only freed once no index entry references it.
//!
//! ## File Layout (persistent mmap)
//!
//! ```text
//! offset 0              → header (4096 bytes: magic, version, counters)
//! offset 4096           → value data, bump-allocated
//! offset current_offset → serialized index (written at graceful close)
//! ```
//!
//! Only a graceful [`Hoard::close`] produces a reopenable file; a killed
//! process leaves the header invalid and the next open reports it.
//!
//! ## Module Overview
//!
//! - [`memory`]: raw address primitives and the slab / mmap allocators
//! - [`storage`]: storage engines and the on-disk header
//! - [`codec`]: value encoding at region addresses
//! - [`index`]: the key → locator index family
//! - [`config`]: centralized constants
//! - [`error`]: the failure taxonomy

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod memory;
pub mod storage;

mod store;

pub use codec::Codec;
pub use error::StoreError;
pub use index::{Index, Locator, StoreKey};
pub use memory::MmapMode;
pub use store::{Builder, Hoard, IndexKind, StoreStats};
