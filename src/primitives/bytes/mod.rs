#![forbid(unsafe_code)]
//! Varint and cursor utilities shared by the on-region codecs.
//!
//! Everything here decodes bytes that came off storage, so malformed input is
//! reported as [`PoolError::Corruption`] rather than panicking.

use crate::types::{PoolError, Result};

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use super::{PoolError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(PoolError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(PoolError::Corruption("varint overflows 64 bits"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(PoolError::Corruption("varint longer than 10 bytes"))
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag-encoded i64 varint from a slice, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing records.

    use core::fmt;

    use super::{var, PoolError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(PoolError::Corruption("cursor offset overflow"))?;
            if end > self.buf.len() {
                return Err(PoolError::Corruption("record truncated"));
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u32.
        pub fn u32_be(&mut self) -> Result<u32> {
            let bytes = self.take(4)?;
            Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
        }

        /// Reads a big-endian u64.
        pub fn u64_be(&mut self) -> Result<u64> {
            let bytes = self.take(8)?;
            Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
        }

        /// Reads an unsigned varint.
        pub fn var_u64(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads an unsigned varint that must fit in a u32.
        pub fn var_u32(&mut self) -> Result<u32> {
            u32::try_from(self.var_u64()?).map_err(|_| PoolError::Corruption("varint exceeds u32"))
        }

        /// Reads a ZigZag varint.
        pub fn var_i64(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off)
        }

        /// Reads a varint length prefix followed by that many bytes.
        pub fn bytes(&mut self) -> Result<&'a [u8]> {
            let len = usize::try_from(self.var_u64()?)
                .map_err(|_| PoolError::Corruption("length prefix too large"))?;
            self.take(len)
        }

        /// Reads a varint length prefix followed by UTF-8 text.
        pub fn str(&mut self) -> Result<&'a str> {
            std::str::from_utf8(self.bytes()?)
                .map_err(|_| PoolError::Corruption("string is not valid UTF-8"))
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Returns true once every byte has been consumed.
        pub fn is_exhausted(&self) -> bool {
            self.remaining() == 0
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }

    /// Appends a varint length prefix followed by the bytes.
    pub fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
        var::encode_u64(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
    }
}

/// Reads a big-endian u16 at `at`.
pub fn get_u16(src: &[u8], at: usize) -> u16 {
    u16::from_be_bytes(src[at..at + 2].try_into().unwrap())
}

/// Reads a big-endian u32 at `at`.
pub fn get_u32(src: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(src[at..at + 4].try_into().unwrap())
}

/// Reads a big-endian u64 at `at`.
pub fn get_u64(src: &[u8], at: usize) -> u64 {
    u64::from_be_bytes(src[at..at + 8].try_into().unwrap())
}

/// Writes a big-endian u16 at `at`.
pub fn put_u16(dst: &mut [u8], at: usize, v: u16) {
    dst[at..at + 2].copy_from_slice(&v.to_be_bytes());
}

/// Writes a big-endian u32 at `at`.
pub fn put_u32(dst: &mut [u8], at: usize, v: u32) {
    dst[at..at + 4].copy_from_slice(&v.to_be_bytes());
}

/// Writes a big-endian u64 at `at`.
pub fn put_u64(dst: &mut [u8], at: usize, v: u64) {
    dst[at..at + 8].copy_from_slice(&v.to_be_bytes());
}

/// Rounds `v` up to a multiple of `align` (a power of two).
pub fn align_up(v: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (v + align - 1) & !(align - 1)
}
