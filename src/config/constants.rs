//! # Configuration Constants
//!
//! All tunables and format constants in one place. Interdependencies:
//!
//! ```text
//! FILE_HEADER_SIZE (4096)
//!       │
//!       ├─> MmapAllocator's bump offset starts here on a fresh file
//!       └─> MapFileHeader is exactly this many bytes (compile-time assert)
//!
//! SIZE_CLASSES (ascending)
//!       │
//!       └─> SlabAllocator picks the smallest class that fits; requests
//!           above the top class take the oversize path
//!
//! PRIMITIVE index load factor (3/4)
//!       │
//!       └─> resize threshold = capacity / 4 * 3
//! ```

/// Slab size classes, ascending. A request picks the smallest class that
/// fits; anything above the last class is allocated at its exact size.
pub const SIZE_CLASSES: [u32; 6] = [16, 64, 256, 1024, 4096, 16384];

/// On-disk header size for memory-mapped files. Value data begins at this
/// offset; a fresh allocator's bump offset starts here.
pub const FILE_HEADER_SIZE: u64 = 4096;

/// Magic number at offset 0 of a persistent store file ("RMAP").
pub const FILE_MAGIC: u32 = 0x524D_4150;

/// On-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Default off-heap memory limit: 1 GiB.
pub const DEFAULT_MAX_MEMORY: u64 = 1024 * 1024 * 1024;

/// Default pre-allocated size for memory-mapped files: 10 GiB. The file is
/// sparse until written, so the large default costs address space, not disk.
pub const DEFAULT_ALLOCATE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Default segment count for the segmented index. Must be a power of two.
pub const DEFAULT_SEGMENT_COUNT: u32 = 64;

/// Default initial capacity for index tables.
pub const DEFAULT_INITIAL_CAPACITY: u32 = 16;

/// Index variant tags as persisted in the file header.
pub const INDEX_TYPE_HASH: u32 = 0;
pub const INDEX_TYPE_SEGMENTED: u32 = 1;
pub const INDEX_TYPE_LONG_PRIMITIVE: u32 = 2;
pub const INDEX_TYPE_INT_PRIMITIVE: u32 = 3;

const _: () = assert!(SIZE_CLASSES[0] >= 16);
const _: () = assert!(DEFAULT_SEGMENT_COUNT.is_power_of_two());
