//! Fixed-width codecs for the primitive types. Zero framing: the encoded
//! form is the value's native representation.

use eyre::Result;

use super::Codec;
use crate::memory::raw;

macro_rules! primitive_codec {
    ($name:ident, $ty:ty, $size:expr, $get:path, $put:path) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Codec<$ty> for $name {
            fn size_of(&self, _value: &$ty) -> Result<u32> {
                Ok($size)
            }

            fn encode(&self, address: u64, value: &$ty) -> Result<u32> {
                // SAFETY: the store allocated at least size_of() == $size
                // bytes at this address.
                unsafe { $put(address, *value) };
                Ok($size)
            }

            fn decode(&self, address: u64) -> Result<$ty> {
                // SAFETY: the index only hands out addresses whose
                // recorded size covers this read.
                Ok(unsafe { $get(address) })
            }

            fn is_fixed_size(&self) -> bool {
                true
            }

            fn fixed_size(&self) -> Option<u32> {
                Some($size)
            }
        }
    };
}

primitive_codec!(I8Codec, i8, 1, raw::get_i8, raw::put_i8);
primitive_codec!(I16Codec, i16, 2, raw::get_i16, raw::put_i16);
primitive_codec!(I32Codec, i32, 4, raw::get_i32, raw::put_i32);
primitive_codec!(I64Codec, i64, 8, raw::get_i64, raw::put_i64);
primitive_codec!(F32Codec, f32, 4, raw::get_f32, raw::put_f32);
primitive_codec!(F64Codec, f64, 8, raw::get_f64, raw::put_f64);

/// Booleans are stored as one byte, nonzero meaning true.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl Codec<bool> for BoolCodec {
    fn size_of(&self, _value: &bool) -> Result<u32> {
        Ok(1)
    }

    fn encode(&self, address: u64, value: &bool) -> Result<u32> {
        // SAFETY: one byte, covered by size_of.
        unsafe { raw::put_i8(address, *value as i8) };
        Ok(1)
    }

    fn decode(&self, address: u64) -> Result<bool> {
        // SAFETY: one byte, covered by the recorded size.
        Ok(unsafe { raw::get_i8(address) } != 0)
    }

    fn is_fixed_size(&self) -> bool {
        true
    }

    fn fixed_size(&self) -> Option<u32> {
        Some(1)
    }
}
