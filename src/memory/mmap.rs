//! # Memory-Mapped File Allocator
//!
//! A bump allocator over a memory-mapped file. The file is created at its
//! full configured size up front (sparse on filesystems that support it)
//! and mapped once; allocation is a compare-and-swap advance of a single
//! offset, so concurrent writers never contend on a lock.
//!
//! ## Layout
//!
//! ```text
//! offset 0                → file header (4096 bytes, persistent mode only)
//! offset FILE_HEADER_SIZE → value data, bump-allocated
//! offset current_offset   → serialized index (written at graceful close)
//! ```
//!
//! `free` is a no-op: space is reclaimed only by discarding the file, so
//! update churn grows the data region. In exchange there is no recycling
//! race: an address handed out once stays valid for the life of the
//! mapping.
//!
//! ## Modes
//!
//! - **Persistent**: opens (or creates) the file at a caller-supplied
//!   path. A nonempty existing file must carry a valid header from a
//!   previous graceful close; the bump offset is restored from it.
//!   Opening with a larger size extends the file, never truncates.
//! - **Temporary**: a generated file in the OS temp directory, unlinked at
//!   close. No header is read or written.
//!
//! ## Safety Model
//!
//! The mapping is created once and never remapped, so addresses derived
//! from its base stay valid until the allocator is dropped. All mutation
//! goes through the raw primitives at allocator-issued, disjoint ranges;
//! the `MmapMut` itself is only used for `flush`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use super::Allocator;
use crate::config::FILE_HEADER_SIZE;
use crate::error::StoreError;
use crate::storage::MapFileHeader;

/// Where the backing file lives.
#[derive(Debug, Clone)]
pub enum MmapMode {
    /// A caller-supplied path that survives close and can be reopened.
    Persistent(PathBuf),
    /// A generated file in the OS temp directory, removed at close.
    Temporary,
}

enum FileHandle {
    Persistent(std::fs::File),
    Temporary(NamedTempFile),
}

/// File-backed bump allocator.
pub struct MmapAllocator {
    /// Keeps the mapping alive; mutation goes through raw addresses.
    mmap: MmapMut,
    base: u64,
    file_size: u64,
    path: PathBuf,
    current_offset: AtomicU64,
    existing_file: bool,
    persistent: bool,
    handle: Mutex<Option<FileHandle>>,
    closed: AtomicBool,
}

impl MmapAllocator {
    /// Opens or creates the backing file and maps it at `allocate_size`
    /// bytes (or the existing file's length, whichever is larger).
    pub fn open(mode: MmapMode, allocate_size: u64) -> Result<Self> {
        ensure!(
            allocate_size >= 1,
            StoreError::Config("allocate_size must be at least 1 byte".into())
        );

        let (handle, path, existing_file, persistent) = match mode {
            MmapMode::Persistent(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).wrap_err_with(|| {
                            format!("failed to create parent directory of '{}'", path.display())
                        })?;
                    }
                }

                // Existence is decided before the file is extended so a
                // freshly pre-allocated file is not mistaken for one that
                // holds data.
                let existing = path
                    .metadata()
                    .map(|m| m.len() > 0)
                    .unwrap_or(false);

                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)
                    .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

                (FileHandle::Persistent(file), path, existing, true)
            }
            MmapMode::Temporary => {
                let temp = tempfile::Builder::new()
                    .prefix("hoard-")
                    .suffix(".map")
                    .tempfile()
                    .wrap_err("failed to create temporary store file")?;
                let path = temp.path().to_path_buf();
                (FileHandle::Temporary(temp), path, false, false)
            }
        };

        let file = match &handle {
            FileHandle::Persistent(f) => f,
            FileHandle::Temporary(t) => t.as_file(),
        };

        let current_len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        let file_size = current_len.max(allocate_size);
        if current_len < file_size {
            file.set_len(file_size).wrap_err_with(|| {
                format!(
                    "failed to extend '{}' to {} bytes",
                    path.display(),
                    file_size
                )
            })?;
        }

        // SAFETY: MmapMut::map_mut is unsafe because the file could be
        // modified externally. This is safe because:
        // 1. The store assumes exclusive ownership of its backing file;
        //    cross-process sharing is out of contract.
        // 2. The file length was set to file_size before mapping.
        // 3. The mapping lives as long as the allocator and is never
        //    remapped, so issued addresses cannot dangle.
        let mut mmap = unsafe {
            MmapMut::map_mut(file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };
        let base = mmap.as_mut_ptr() as u64;

        debug!(
            path = %path.display(),
            file_size,
            existing_file,
            "mapped store file"
        );

        Ok(Self {
            mmap,
            base,
            file_size,
            path,
            current_offset: AtomicU64::new(FILE_HEADER_SIZE),
            existing_file,
            persistent,
            handle: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Whether the file held data before this session opened it.
    pub fn is_existing_file(&self) -> bool {
        self.existing_file
    }

    /// Whether the file survives close.
    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// Base address of the mapping. Differs between runs; persisted index
    /// entries therefore store offsets relative to it.
    pub fn base_address(&self) -> u64 {
        self.base
    }

    /// Absolute address of a file offset.
    pub fn address_at(&self, offset: u64) -> u64 {
        debug_assert!(offset < self.file_size);
        self.base + offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Restores the bump offset from a persisted header.
    pub fn restore_offset(&self, offset: u64) {
        self.current_offset.store(offset, Ordering::Release);
        debug!(offset, "restored allocation offset");
    }

    /// Parses and validates the on-disk header.
    pub fn read_header(&self) -> Result<MapFileHeader> {
        // SAFETY: the mapping is at least FILE_HEADER_SIZE bytes (the file
        // is never created smaller than its header) and stays alive for
        // the borrow's duration.
        let bytes =
            unsafe { std::slice::from_raw_parts(self.base as *const u8, FILE_HEADER_SIZE as usize) };
        Ok(MapFileHeader::from_bytes(bytes)?.clone())
    }

    /// Writes the header at offset 0.
    pub fn write_header(&self, header: &MapFileHeader) {
        use zerocopy::IntoBytes;

        // SAFETY: same extent argument as read_header; the header region
        // is written only from close paths, which the caller quiesces.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(self.base as *mut u8, FILE_HEADER_SIZE as usize)
        };
        bytes.copy_from_slice(header.as_bytes());
    }

    /// Forces the mapping to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .wrap_err_with(|| format!("failed to flush '{}'", self.path.display()))
    }
}

impl Allocator for MmapAllocator {
    fn allocate(&self, size: u32) -> Result<u64> {
        ensure!(size >= 1, StoreError::InvalidSize(size as u64));
        ensure!(
            !self.closed.load(Ordering::Acquire),
            StoreError::AlreadyClosed
        );

        loop {
            let offset = self.current_offset.load(Ordering::Acquire);
            let end = offset + size as u64;

            if end > self.file_size {
                eyre::bail!(StoreError::OutOfSpace {
                    requested: size as u64,
                    available: self.file_size.saturating_sub(offset),
                });
            }

            match self.current_offset.compare_exchange_weak(
                offset,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(self.address_at(offset)),
                Err(_) => continue,
            }
        }
    }

    /// No-op: mapped space is reclaimed only by discarding the file.
    fn free(&self, _address: u64, _size: u32) {}

    fn used(&self) -> u64 {
        self.current_offset.load(Ordering::Acquire)
    }

    fn total(&self) -> u64 {
        self.file_size
    }

    fn available(&self) -> u64 {
        self.file_size.saturating_sub(self.used())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.flush() {
            debug!(error = %e, "flush during close failed");
        }

        // Dropping the handle releases the descriptor; for temporary mode
        // it also unlinks the file. The mapping itself stays valid until
        // the allocator is dropped.
        let _ = self.handle.lock().take();
        debug!(path = %self.path.display(), "closed store file");
    }
}

impl Drop for MmapAllocator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocation_is_monotonic() {
        let alloc = MmapAllocator::open(MmapMode::Temporary, 1024 * 1024).unwrap();

        let a = alloc.allocate(100).unwrap();
        let b = alloc.allocate(50).unwrap();

        assert_eq!(a, alloc.base_address() + FILE_HEADER_SIZE);
        assert_eq!(b, a + 100);
        assert_eq!(alloc.used(), FILE_HEADER_SIZE + 150);
    }

    #[test]
    fn free_is_a_no_op() {
        let alloc = MmapAllocator::open(MmapMode::Temporary, 1024 * 1024).unwrap();

        let a = alloc.allocate(64).unwrap();
        let used = alloc.used();
        alloc.free(a, 64);

        assert_eq!(alloc.used(), used);
    }

    #[test]
    fn out_of_space_when_file_is_full() {
        let alloc = MmapAllocator::open(MmapMode::Temporary, FILE_HEADER_SIZE + 128).unwrap();

        alloc.allocate(128).unwrap();
        let err = alloc.allocate(1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::OutOfSpace { .. })
        ));
    }

    #[test]
    fn temporary_file_removed_on_close() {
        let alloc = MmapAllocator::open(MmapMode::Temporary, 1024 * 1024).unwrap();
        let path = alloc.path().to_path_buf();
        assert!(path.exists());

        alloc.close();
        assert!(!path.exists());
    }

    #[test]
    fn fresh_persistent_file_is_not_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.map");

        let alloc =
            MmapAllocator::open(MmapMode::Persistent(path.clone()), 1024 * 1024).unwrap();
        assert!(!alloc.is_existing_file());
        assert!(alloc.persistent());
        drop(alloc);

        // The pre-allocated file now has nonzero length, so a reopen sees
        // an existing file.
        let alloc = MmapAllocator::open(MmapMode::Persistent(path), 1024 * 1024).unwrap();
        assert!(alloc.is_existing_file());
    }

    #[test]
    fn header_round_trip_through_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.map");

        let alloc =
            MmapAllocator::open(MmapMode::Persistent(path.clone()), 1024 * 1024).unwrap();
        let mut header = MapFileHeader::new();
        header.set_entry_count(3);
        header.set_current_offset(8192);
        alloc.write_header(&header);
        alloc.flush().unwrap();
        drop(alloc);

        let alloc = MmapAllocator::open(MmapMode::Persistent(path), 1024 * 1024).unwrap();
        let header = alloc.read_header().unwrap();
        assert_eq!(header.entry_count(), 3);
        assert_eq!(header.current_offset(), 8192);
    }

    #[test]
    fn garbage_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.map");
        std::fs::write(&path, vec![0xFFu8; 8192]).unwrap();

        let alloc = MmapAllocator::open(MmapMode::Persistent(path), 1024 * 1024).unwrap();
        assert!(alloc.is_existing_file());
        let err = alloc.read_header().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::IncompatibleFile { .. })
        ));
    }

    #[test]
    fn reopen_with_larger_size_extends_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.map");

        let alloc =
            MmapAllocator::open(MmapMode::Persistent(path.clone()), FILE_HEADER_SIZE + 64)
                .unwrap();
        drop(alloc);

        let alloc =
            MmapAllocator::open(MmapMode::Persistent(path.clone()), FILE_HEADER_SIZE + 1024)
                .unwrap();
        assert_eq!(alloc.file_size(), FILE_HEADER_SIZE + 1024);
        drop(alloc);

        // A smaller request keeps the existing length.
        let alloc =
            MmapAllocator::open(MmapMode::Persistent(path), FILE_HEADER_SIZE + 64).unwrap();
        assert_eq!(alloc.file_size(), FILE_HEADER_SIZE + 1024);
    }
}
