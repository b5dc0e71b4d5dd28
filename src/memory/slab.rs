//! # Slab Allocator
//!
//! Size-classed pooling over anonymous native memory. Allocations are
//! rounded up to a fixed class; freed blocks go onto the class's lock-free
//! free list and are reused before new memory is requested from the
//! system. Requests above the largest class take an oversize path that
//! allocates and releases at exact size.
//!
//! ## Accounting
//!
//! `used` is enforced against the configured limit with a CAS reservation
//! loop, so concurrent allocators cannot overshoot. Every block obtained
//! from the system is recorded: class blocks in a per-class registry that
//! is released wholesale on close, oversize blocks in a map keyed by
//! address so close can release whatever the caller never freed.
//!
//! Invariant: a free-list entry is always also a registry entry, so close
//! releases through the registry only.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_queue::SegQueue;
use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{raw, Allocator};
use crate::config::SIZE_CLASSES;
use crate::error::StoreError;

struct Slab {
    block_size: u32,
    free_list: SegQueue<u64>,
    /// Every block this class ever obtained from the system.
    blocks: Mutex<Vec<u64>>,
    total_allocated: AtomicU64,
}

impl Slab {
    fn new(block_size: u32) -> Self {
        Self {
            block_size,
            free_list: SegQueue::new(),
            blocks: Mutex::new(Vec::new()),
            total_allocated: AtomicU64::new(0),
        }
    }

    fn allocate(&self) -> Result<u64> {
        if let Some(addr) = self.free_list.pop() {
            return Ok(addr);
        }

        let addr = raw::allocate(self.block_size as usize)?;
        self.blocks.lock().push(addr);
        self.total_allocated
            .fetch_add(self.block_size as u64, Ordering::AcqRel);
        Ok(addr)
    }

    fn free(&self, addr: u64) {
        self.free_list.push(addr);
    }

    fn release_all(&self) {
        // Registry entries are the authoritative set; the free list only
        // aliases a subset of them.
        while self.free_list.pop().is_some() {}

        let mut blocks = self.blocks.lock();
        for addr in blocks.drain(..) {
            // SAFETY: each registry entry was obtained from raw::allocate
            // with this class's block size and is released exactly once
            // because drain empties the registry.
            unsafe { raw::release(addr, self.block_size as usize) };
        }
        self.total_allocated.store(0, Ordering::Release);
    }
}

/// Size-classed allocator over anonymous native memory.
pub struct SlabAllocator {
    slabs: Vec<Slab>,
    max_memory: u64,
    used: AtomicU64,
    oversize: Mutex<HashMap<u64, u32>>,
    oversize_total: AtomicU64,
    closed: AtomicBool,
}

impl SlabAllocator {
    /// Creates an allocator limited to `max_memory` bytes of outstanding
    /// allocations.
    pub fn new(max_memory: u64) -> Result<Self> {
        ensure!(
            max_memory >= 1,
            StoreError::Config("max_memory must be at least 1 byte".into())
        );

        Ok(Self {
            slabs: SIZE_CLASSES.iter().map(|&c| Slab::new(c)).collect(),
            max_memory,
            used: AtomicU64::new(0),
            oversize: Mutex::new(HashMap::new()),
            oversize_total: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn slab_for(&self, size: u32) -> Option<&Slab> {
        self.slabs.iter().find(|s| size <= s.block_size)
    }

    /// Reserves `bytes` against the limit, or fails without side effects.
    fn reserve(&self, bytes: u64) -> Result<()> {
        loop {
            let current = self.used.load(Ordering::Acquire);
            let new = current + bytes;

            if new > self.max_memory {
                eyre::bail!(StoreError::OutOfSpace {
                    requested: bytes,
                    available: self.max_memory.saturating_sub(current),
                });
            }

            match self
                .used
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    fn unreserve(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

impl Allocator for SlabAllocator {
    fn allocate(&self, size: u32) -> Result<u64> {
        ensure!(size >= 1, StoreError::InvalidSize(size as u64));
        ensure!(
            !self.closed.load(Ordering::Acquire),
            StoreError::AlreadyClosed
        );

        match self.slab_for(size) {
            Some(slab) => {
                self.reserve(slab.block_size as u64)?;
                match slab.allocate() {
                    Ok(addr) => Ok(addr),
                    Err(e) => {
                        self.unreserve(slab.block_size as u64);
                        Err(e)
                    }
                }
            }
            None => {
                self.reserve(size as u64)?;
                match raw::allocate(size as usize) {
                    Ok(addr) => {
                        self.oversize.lock().insert(addr, size);
                        self.oversize_total.fetch_add(size as u64, Ordering::AcqRel);
                        Ok(addr)
                    }
                    Err(e) => {
                        self.unreserve(size as u64);
                        Err(e)
                    }
                }
            }
        }
    }

    fn free(&self, address: u64, size: u32) {
        if address == 0 || self.closed.load(Ordering::Acquire) {
            return;
        }

        match self.slab_for(size) {
            Some(slab) => {
                slab.free(address);
                self.unreserve(slab.block_size as u64);
            }
            None => {
                if self.oversize.lock().remove(&address).is_some() {
                    // SAFETY: the oversize registry only holds addresses
                    // issued by allocate at exactly this size, and the
                    // remove above makes this release unique.
                    unsafe { raw::release(address, size as usize) };
                    self.oversize_total.fetch_sub(size as u64, Ordering::AcqRel);
                    self.unreserve(size as u64);
                }
            }
        }
    }

    fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    fn total(&self) -> u64 {
        let pooled: u64 = self
            .slabs
            .iter()
            .map(|s| s.total_allocated.load(Ordering::Acquire))
            .sum();
        pooled + self.oversize_total.load(Ordering::Acquire)
    }

    fn available(&self) -> u64 {
        self.max_memory.saturating_sub(self.used())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for slab in &self.slabs {
            slab.release_all();
        }

        let mut oversize = self.oversize.lock();
        for (addr, size) in oversize.drain() {
            // SAFETY: same contract as the oversize free path; drain makes
            // each release unique.
            unsafe { raw::release(addr, size as usize) };
        }
        self.oversize_total.store(0, Ordering::Release);
        self.used.store(0, Ordering::Release);
    }
}

impl Drop for SlabAllocator {
    fn drop(&mut self) {
        self.close();
    }
}
