//! # Store File Header
//!
//! The first 4096 bytes of a persistent store file. A valid header exists
//! only after a graceful close; it is what lets a cold process re-attach
//! to the file and resume without rescanning values.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Field            Meaning
//! ------  ----  ---------------  -----------------------------------------
//! 0       4     magic            0x524D4150
//! 4       4     version          1
//! 8       4     index_type       0=Hash 1=Segmented 2=LongPrim 3=IntPrim
//! 12      4     entry_count      live entries at last clean close
//! 16      8     current_offset   end of the data region at last clean close
//! 24      8     index_offset     where the serialized index begins
//! 32      8     index_size       byte length of the serialized index
//! 40      4056  reserved         zeroed
//! ```
//!
//! Multi-byte fields use the zerocopy little-endian wrappers. The store is
//! host-native elsewhere and only targets little-endian hosts, where the
//! two coincide.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{FILE_HEADER_SIZE, FILE_MAGIC, FORMAT_VERSION};
use crate::error::StoreError;

#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MapFileHeader {
    magic: U32,
    version: U32,
    index_type: U32,
    entry_count: U32,
    current_offset: U64,
    index_offset: U64,
    index_size: U64,
    reserved: [u8; 4056],
}

const _: () = assert!(std::mem::size_of::<MapFileHeader>() == FILE_HEADER_SIZE as usize);

impl MapFileHeader {
    pub fn new() -> Self {
        Self {
            magic: U32::new(FILE_MAGIC),
            version: U32::new(FORMAT_VERSION),
            index_type: U32::new(0),
            entry_count: U32::new(0),
            current_offset: U64::new(FILE_HEADER_SIZE),
            index_offset: U64::new(0),
            index_size: U64::new(0),
            reserved: [0u8; 4056],
        }
    }

    /// Parses a header, validating magic and version.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE as usize,
            "buffer too small for MapFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE as usize])
            .map_err(|e| eyre::eyre!("failed to parse MapFileHeader: {:?}", e))?;

        ensure!(
            header.magic.get() == FILE_MAGIC,
            StoreError::IncompatibleFile {
                reason: format!("bad magic number 0x{:08x}", header.magic.get()),
            }
        );
        ensure!(
            header.version.get() == FORMAT_VERSION,
            StoreError::IncompatibleFile {
                reason: format!(
                    "unsupported version {} (expected {})",
                    header.version.get(),
                    FORMAT_VERSION
                ),
            }
        );

        Ok(header)
    }

    /// Whether `bytes` begins with a header this build can read.
    pub fn is_valid(bytes: &[u8]) -> bool {
        Self::from_bytes(bytes).is_ok()
    }

    pub fn magic(&self) -> u32 {
        self.magic.get()
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn index_type(&self) -> u32 {
        self.index_type.get()
    }

    pub fn set_index_type(&mut self, index_type: u32) {
        self.index_type = U32::new(index_type);
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count.get()
    }

    pub fn set_entry_count(&mut self, count: u32) {
        self.entry_count = U32::new(count);
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset.get()
    }

    pub fn set_current_offset(&mut self, offset: u64) {
        self.current_offset = U64::new(offset);
    }

    pub fn index_offset(&self) -> u64 {
        self.index_offset.get()
    }

    pub fn set_index_offset(&mut self, offset: u64) {
        self.index_offset = U64::new(offset);
    }

    pub fn index_size(&self) -> u64 {
        self.index_size.get()
    }

    pub fn set_index_size(&mut self, size: u64) {
        self.index_size = U64::new(size);
    }
}

impl Default for MapFileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MapFileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapFileHeader")
            .field("magic", &format_args!("0x{:08x}", self.magic.get()))
            .field("version", &self.version.get())
            .field("index_type", &self.index_type.get())
            .field("entry_count", &self.entry_count.get())
            .field("current_offset", &self.current_offset.get())
            .field("index_offset", &self.index_offset.get())
            .field("index_size", &self.index_size.get())
            .finish()
    }
}
