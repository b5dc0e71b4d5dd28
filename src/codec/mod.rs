//! # Codec Module
//!
//! A codec turns a typed value into bytes at a region address and back.
//! Codecs are the only component that interprets value bytes; the
//! allocator and index treat them as opaque `(address, size)` extents.
//!
//! ## Contract
//!
//! - `size_of` must return exactly the byte count `encode` will write.
//!   The store allocates that many bytes before encoding.
//! - `encode` returns the bytes actually written, which must equal
//!   `size_of` for the same value.
//! - `decode` never fails on bytes a codec of the same type wrote;
//!   corrupt input is a `StoreError::Codec`.
//!
//! All encodings are host-native byte order. A store file is therefore
//! not portable across byte orders.
//!
//! ## Built-ins
//!
//! - [`primitive`]: fixed-width integer, float, and bool codecs
//! - [`string`]: length-prefixed UTF-8 strings and raw byte vectors

pub mod primitive;
pub mod string;

pub use primitive::{BoolCodec, F32Codec, F64Codec, I16Codec, I32Codec, I64Codec, I8Codec};
pub use string::{BytesCodec, NullableStringCodec, StringCodec};

use eyre::Result;

/// Encodes and decodes values of type `T` at region addresses.
///
/// Addresses handed to a codec always come from the store's own
/// allocator, sized by `size_of`; implementations may rely on that extent
/// being writable without further checks.
pub trait Codec<T>: Send + Sync {
    /// Exact byte count `encode` will write for `value`.
    fn size_of(&self, value: &T) -> Result<u32>;

    /// Writes `value` at `address`; returns the bytes written.
    fn encode(&self, address: u64, value: &T) -> Result<u32>;

    /// Reads a value back from `address`.
    fn decode(&self, address: u64) -> Result<T>;

    /// Whether every value of `T` encodes to the same byte count.
    fn is_fixed_size(&self) -> bool {
        false
    }

    /// The fixed byte count, when `is_fixed_size` holds.
    fn fixed_size(&self) -> Option<u32> {
        None
    }
}
