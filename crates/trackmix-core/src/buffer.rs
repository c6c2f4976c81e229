//! Word-aligned sample storage and buffer handles
//!
//! Output buffers and adapter scratch space are backed by `Vec<u32>` so that
//! any 16-bit or 32-bit sample view over them is aligned; typed views are
//! obtained with bytemuck casts, never pointer arithmetic.

use std::fmt;

/// Byte buffer with 4-byte alignment
#[derive(Clone, Default)]
pub struct AlignedBuf {
    words: Vec<u32>,
    len: usize,
}

impl AlignedBuf {
    /// Zero-filled buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(4)],
            len,
        }
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.len]
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..self.len]
    }

    /// View as 16-bit samples (trailing odd byte ignored)
    #[inline]
    pub fn as_i16(&self) -> &[i16] {
        &bytemuck::cast_slice::<u32, i16>(&self.words)[..self.len / 2]
    }

    #[inline]
    pub fn as_i16_mut(&mut self) -> &mut [i16] {
        &mut bytemuck::cast_slice_mut::<u32, i16>(&mut self.words)[..self.len / 2]
    }

    /// View as float samples
    #[inline]
    pub fn as_f32(&self) -> &[f32] {
        &bytemuck::cast_slice::<u32, f32>(&self.words)[..self.len / 4]
    }

    #[inline]
    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        &mut bytemuck::cast_slice_mut::<u32, f32>(&mut self.words)[..self.len / 4]
    }

    /// Zero the whole buffer
    pub fn fill_zero(&mut self) {
        self.words.fill(0);
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf").field("len", &self.len).finish()
    }
}

/// Handle of a mixer-owned main output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle of a mixer-owned aux (send) buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuxBufferId(pub(crate) usize);

impl AuxBufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_views_share_storage() {
        let mut buf = AlignedBuf::new(8);
        assert_eq!(buf.len(), 8);
        buf.as_i16_mut()[1] = -2;
        assert_eq!(buf.as_i16(), &[0, -2, 0, 0]);
        buf.as_f32_mut()[1] = 0.5;
        assert_eq!(buf.as_f32()[1], 0.5);
        assert_eq!(&buf.as_bytes()[4..8], &0.5f32.to_ne_bytes());
        buf.fill_zero();
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_odd_length() {
        let buf = AlignedBuf::new(7);
        assert_eq!(buf.as_bytes().len(), 7);
        assert_eq!(buf.as_i16().len(), 3);
        assert_eq!(buf.as_f32().len(), 1);
        assert!(AlignedBuf::default().is_empty());
    }
}
