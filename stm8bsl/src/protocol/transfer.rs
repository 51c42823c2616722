//! Address ranges and their split into bootloader-sized chunks.

use crate::error::{Error, Result};

/// Largest block the bootloader returns for one READ.
pub const READ_CHUNK_SIZE: usize = 256;

/// Largest block the bootloader accepts for one WRITE.
pub const WRITE_CHUNK_SIZE: usize = 128;

/// A span of target memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRange {
    /// First address of the span.
    pub start: u32,
    /// Number of bytes.
    pub length: u32,
}

/// One window of a [`TransferRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Target address of the first byte.
    pub address: u32,
    /// Byte offset from the start of the range.
    pub offset: usize,
    /// Number of bytes in this window.
    pub len: usize,
}

impl TransferRange {
    /// Create a range, rejecting spans that run past the 32-bit address space.
    pub fn new(start: u32, length: usize) -> Result<Self> {
        let out_of_range = || Error::AddressOutOfRange {
            address: start,
            length: u32::try_from(length).unwrap_or(u32::MAX),
        };
        let length = u32::try_from(length).map_err(|_| out_of_range())?;
        if length > 0 && start.checked_add(length - 1).is_none() {
            return Err(out_of_range());
        }
        Ok(Self { start, length })
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Address one past the last byte.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.length)
    }

    /// Split into ascending windows of at most `chunk_size` bytes.
    ///
    /// Only the last window may be shorter than `chunk_size`.
    pub fn chunks(&self, chunk_size: usize) -> Chunks {
        Chunks {
            range: *self,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }
}

/// Iterator returned by [`TransferRange::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks {
    range: TransferRange,
    chunk_size: usize,
    offset: usize,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let total = self.range.length as usize;
        if self.offset >= total {
            return None;
        }
        let len = self.chunk_size.min(total - self.offset);
        let chunk = Chunk {
            address: self.range.start + self.offset as u32,
            offset: self.offset,
            len,
        };
        self.offset += len;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.range.length as usize - self.offset).div_ceil(self.chunk_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(start: u32, length: usize, chunk_size: usize) {
        let range = TransferRange::new(start, length).unwrap();
        let chunks: Vec<Chunk> = range.chunks(chunk_size).collect();

        let mut expected_addr = start;
        let mut covered = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.address, expected_addr, "gap or overlap at chunk {i}");
            assert_eq!(chunk.offset, covered);
            assert!(chunk.len >= 1 && chunk.len <= chunk_size);
            if i + 1 < chunks.len() {
                assert_eq!(chunk.len, chunk_size, "only the last chunk may be short");
            }
            expected_addr += chunk.len as u32;
            covered += chunk.len;
        }
        assert_eq!(covered, length);
        assert_eq!(chunks.len(), length.div_ceil(chunk_size));
    }

    #[test]
    fn test_chunks_cover_range_exactly() {
        for chunk_size in [1, 7, 64, 127, 128, 255, 256] {
            for length in [1, 2, 127, 128, 129, 255, 256, 257, 1000, 4096] {
                assert_exact_cover(0x8000, length, chunk_size);
            }
        }
    }

    #[test]
    fn test_empty_range_has_no_chunks() {
        let range = TransferRange::new(0x8000, 0).unwrap();
        assert!(range.is_empty());
        assert_eq!(range.chunks(READ_CHUNK_SIZE).count(), 0);
    }

    #[test]
    fn test_write_chunks_last_short() {
        let range = TransferRange::new(0x8000, 300).unwrap();
        let lens: Vec<usize> = range.chunks(WRITE_CHUNK_SIZE).map(|c| c.len).collect();
        assert_eq!(lens, vec![128, 128, 44]);
    }

    #[test]
    fn test_range_overflow_rejected() {
        assert!(TransferRange::new(u32::MAX, 1).is_ok());
        assert!(matches!(
            TransferRange::new(u32::MAX, 2),
            Err(Error::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn test_size_hint() {
        let range = TransferRange::new(0, 513).unwrap();
        let mut chunks = range.chunks(256);
        assert_eq!(chunks.len(), 3);
        chunks.next();
        assert_eq!(chunks.len(), 2);
    }
}
