//! Little-endian field access for page and record images.
//!
//! The `read_*`/`write_*` helpers index directly and panic on out-of-range
//! offsets; callers compute offsets from validated layouts. [`Cursor`] is the
//! checked variant for decoding logged images.

use super::{Error, Result};

#[inline]
pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(bytes)
}

#[inline]
pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[inline]
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

#[inline]
pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Checked reader over a logged byte image.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.index >= self.data.len()
    }

    pub(crate) fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.index + len > self.data.len() {
            return Err(Error::TruncatedLog);
        }
        let start = self.index;
        self.index += len;
        Ok(&self.data[start..start + len])
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        Ok(read_u16(self.read_exact(2)?, 0))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(read_u32(self.read_exact(4)?, 0))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        Ok(read_u64(self.read_exact(8)?, 0))
    }

    /// A `u32` length followed by that many bytes.
    pub(crate) fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.read_exact(len)
    }
}

pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}
