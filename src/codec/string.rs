//! Length-prefixed codecs for variable-size payloads.
//!
//! Wire shape is `[i32 length][bytes]`. Length 0 is an empty payload;
//! length -1 marks an absent value and is only written by
//! [`NullableStringCodec`].

use eyre::Result;

use super::Codec;
use crate::error::StoreError;
use crate::memory::raw;

const LEN_PREFIX: u32 = 4;

fn encode_bytes(address: u64, bytes: &[u8]) -> u32 {
    // SAFETY: the caller allocated LEN_PREFIX + bytes.len() via size_of.
    unsafe {
        raw::put_i32(address, bytes.len() as i32);
        if !bytes.is_empty() {
            raw::copy_from_slice(bytes, address + LEN_PREFIX as u64);
        }
    }
    LEN_PREFIX + bytes.len() as u32
}

fn decode_bytes(address: u64) -> Result<Option<Vec<u8>>> {
    // SAFETY: the recorded entry size covers the prefix and, per the
    // encode path, `len` further bytes.
    let len = unsafe { raw::get_i32(address) };
    match len {
        -1 => Ok(None),
        len if len < 0 => {
            eyre::bail!(StoreError::Codec(format!("corrupt length prefix: {}", len)))
        }
        0 => Ok(Some(Vec::new())),
        len => {
            let mut bytes = vec![0u8; len as usize];
            unsafe { raw::copy_to_slice(address + LEN_PREFIX as u64, &mut bytes) };
            Ok(Some(bytes))
        }
    }
}

/// UTF-8 strings with an `i32` length prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn size_of(&self, value: &String) -> Result<u32> {
        Ok(LEN_PREFIX + value.len() as u32)
    }

    fn encode(&self, address: u64, value: &String) -> Result<u32> {
        Ok(encode_bytes(address, value.as_bytes()))
    }

    fn decode(&self, address: u64) -> Result<String> {
        let bytes = decode_bytes(address)?.ok_or_else(|| {
            StoreError::Codec("absent-value marker in non-nullable string".into())
        })?;
        String::from_utf8(bytes)
            .map_err(|e| StoreError::Codec(format!("invalid utf-8: {}", e)).into())
    }
}

/// Strings where `None` is representable, encoded as length -1.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullableStringCodec;

impl Codec<Option<String>> for NullableStringCodec {
    fn size_of(&self, value: &Option<String>) -> Result<u32> {
        Ok(match value {
            Some(s) => LEN_PREFIX + s.len() as u32,
            None => LEN_PREFIX,
        })
    }

    fn encode(&self, address: u64, value: &Option<String>) -> Result<u32> {
        match value {
            Some(s) => Ok(encode_bytes(address, s.as_bytes())),
            None => {
                // SAFETY: size_of reserved the 4-byte prefix.
                unsafe { raw::put_i32(address, -1) };
                Ok(LEN_PREFIX)
            }
        }
    }

    fn decode(&self, address: u64) -> Result<Option<String>> {
        match decode_bytes(address)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|e| {
                StoreError::Codec(format!("invalid utf-8: {}", e))
            })?)),
        }
    }
}

/// Raw byte vectors with an `i32` length prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn size_of(&self, value: &Vec<u8>) -> Result<u32> {
        Ok(LEN_PREFIX + value.len() as u32)
    }

    fn encode(&self, address: u64, value: &Vec<u8>) -> Result<u32> {
        Ok(encode_bytes(address, value))
    }

    fn decode(&self, address: u64) -> Result<Vec<u8>> {
        decode_bytes(address)?
            .ok_or_else(|| StoreError::Codec("absent-value marker in byte vector".into()).into())
    }
}
