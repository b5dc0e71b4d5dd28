//! # Raw Memory Primitives
//!
//! Unchecked typed access to process memory through integer addresses.
//! Everything above this module speaks `u64` addresses; this is the only
//! place that turns them back into pointers.
//!
//! ## Design
//!
//! The primitives are deliberately unchecked: bounds belong to the caller,
//! which always knows the extent of the allocation it is writing into
//! (allocators hand out `(address, size)` pairs and the index records
//! them). Keeping the checks out of this layer keeps the per-field cost of
//! codecs at a single move instruction.
//!
//! All multi-byte access is unaligned and host-native endianness. A store
//! file is therefore not portable across byte orders; the on-disk header
//! module documents the same restriction.
//!
//! The volatile and CAS entry points require naturally aligned addresses;
//! they exist for callers that coordinate through shared region words
//! rather than Rust-level atomics.

use std::alloc::{alloc, dealloc, realloc, Layout};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use eyre::{ensure, Result};

use crate::error::StoreError;

/// Alignment for every block handed out by [`allocate`].
pub const ALLOC_ALIGN: usize = 8;

macro_rules! load_store {
    ($get:ident, $put:ident, $ty:ty) => {
        /// # Safety
        ///
        /// `addr` must point to at least the primitive's width in bytes of
        /// readable (for loads) or writable (for stores) memory owned by
        /// one of the store's allocators.
        #[inline]
        pub unsafe fn $get(addr: u64) -> $ty {
            (addr as *const $ty).read_unaligned()
        }

        /// # Safety
        ///
        /// See the matching load.
        #[inline]
        pub unsafe fn $put(addr: u64, value: $ty) {
            (addr as *mut $ty).write_unaligned(value)
        }
    };
}

load_store!(get_i8, put_i8, i8);
load_store!(get_i16, put_i16, i16);
load_store!(get_i32, put_i32, i32);
load_store!(get_i64, put_i64, i64);
load_store!(get_f32, put_f32, f32);
load_store!(get_f64, put_f64, f64);

/// # Safety
///
/// `addr` must be 4-byte aligned and point into live region memory.
#[inline]
pub unsafe fn load_volatile_i32(addr: u64) -> i32 {
    (*(addr as *const AtomicI32)).load(Ordering::SeqCst)
}

/// # Safety
///
/// `addr` must be 4-byte aligned and point into live region memory.
#[inline]
pub unsafe fn store_volatile_i32(addr: u64, value: i32) {
    (*(addr as *const AtomicI32)).store(value, Ordering::SeqCst)
}

/// # Safety
///
/// `addr` must be 8-byte aligned and point into live region memory.
#[inline]
pub unsafe fn load_volatile_i64(addr: u64) -> i64 {
    (*(addr as *const AtomicI64)).load(Ordering::SeqCst)
}

/// # Safety
///
/// `addr` must be 8-byte aligned and point into live region memory.
#[inline]
pub unsafe fn store_volatile_i64(addr: u64, value: i64) {
    (*(addr as *const AtomicI64)).store(value, Ordering::SeqCst)
}

/// Sequentially consistent compare-and-swap on a 4-byte word.
///
/// # Safety
///
/// `addr` must be 4-byte aligned and point into live region memory.
#[inline]
pub unsafe fn cas_i32(addr: u64, expected: i32, new: i32) -> bool {
    (*(addr as *const AtomicI32))
        .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Sequentially consistent compare-and-swap on an 8-byte word.
///
/// # Safety
///
/// `addr` must be 8-byte aligned and point into live region memory.
#[inline]
pub unsafe fn cas_i64(addr: u64, expected: i64, new: i64) -> bool {
    (*(addr as *const AtomicI64))
        .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Copies `len` bytes between two region addresses. Ranges may overlap.
///
/// # Safety
///
/// Both ranges must be live allocations of at least `len` bytes.
#[inline]
pub unsafe fn copy(src: u64, dst: u64, len: usize) {
    std::ptr::copy(src as *const u8, dst as *mut u8, len)
}

/// Copies a byte slice into region memory.
///
/// # Safety
///
/// `dst` must be writable for `src.len()` bytes and must not overlap `src`.
#[inline]
pub unsafe fn copy_from_slice(src: &[u8], dst: u64) {
    std::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len())
}

/// Copies region memory into a byte slice.
///
/// # Safety
///
/// `src` must be readable for `dst.len()` bytes and must not overlap `dst`.
#[inline]
pub unsafe fn copy_to_slice(src: u64, dst: &mut [u8]) {
    std::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len())
}

/// Fills `len` bytes at `addr` with `byte`.
///
/// # Safety
///
/// `addr` must be writable for `len` bytes.
#[inline]
pub unsafe fn fill(addr: u64, len: usize, byte: u8) {
    std::ptr::write_bytes(addr as *mut u8, byte, len)
}

/// Allocates `size` bytes from the system allocator.
///
/// Returns a nonzero, 8-byte-aligned address.
pub fn allocate(size: usize) -> Result<u64> {
    ensure!(size > 0, StoreError::InvalidSize(0));

    // SAFETY: the layout is non-zero-sized and ALLOC_ALIGN is a power of
    // two, which is all `alloc` requires. A null return is handled below.
    let layout = Layout::from_size_align(size, ALLOC_ALIGN)
        .map_err(|_| StoreError::InvalidSize(size as u64))?;
    let ptr = unsafe { alloc(layout) };

    ensure!(
        !ptr.is_null(),
        StoreError::AllocationFailed { bytes: size as u64 }
    );
    Ok(ptr as u64)
}

/// Returns a block obtained from [`allocate`] to the system.
///
/// # Safety
///
/// `addr` must have come from [`allocate`] (or [`reallocate`]) with this
/// exact `size`, and must not be used afterwards.
pub unsafe fn release(addr: u64, size: usize) {
    dealloc(
        addr as *mut u8,
        Layout::from_size_align_unchecked(size, ALLOC_ALIGN),
    )
}

/// Resizes a block obtained from [`allocate`], preserving its contents up
/// to the smaller of the two sizes.
///
/// # Safety
///
/// `addr` must have come from [`allocate`] with exactly `old_size`. On
/// success the old address must not be used again.
pub unsafe fn reallocate(addr: u64, old_size: usize, new_size: usize) -> Result<u64> {
    ensure!(new_size > 0, StoreError::InvalidSize(0));

    let layout = Layout::from_size_align_unchecked(old_size, ALLOC_ALIGN);
    let ptr = realloc(addr as *mut u8, layout, new_size);

    ensure!(
        !ptr.is_null(),
        StoreError::AllocationFailed {
            bytes: new_size as u64
        }
    );
    Ok(ptr as u64)
}
