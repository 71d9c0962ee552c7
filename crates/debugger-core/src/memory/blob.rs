//! Accessor for flat memory blobs (regions and shared blocks) independent of any processor.
//!
//! Blob storage is a run of `width`-byte words, each kept in little-endian host order. Byte
//! `n` of a big-endian blob therefore lives at the mirrored lane of its word.

use crate::memory::{AccessSize, Endianness};

/// Reads and writes a blob by byte offset honoring its word width and endianness.
#[derive(Debug)]
pub struct BlobAccessor<'a> {
    data: &'a mut [u8],
    width: u8,
    endianness: Endianness,
}

impl<'a> BlobAccessor<'a> {
    /// Wraps `data`; widths other than 1, 2, 4, or 8 are treated as byte-wide.
    #[must_use]
    pub const fn new(data: &'a mut [u8], width: u8, endianness: Endianness) -> Self {
        let width = if AccessSize::from_bytes(width).is_some() {
            width
        } else {
            1
        };
        Self {
            data,
            width,
            endianness,
        }
    }

    /// Blob length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for an empty blob.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn storage_index(&self, offset: u64) -> Option<usize> {
        let low = u64::from(self.width - 1);
        let lane = match self.endianness {
            Endianness::Little => offset & low,
            Endianness::Big => (offset & low) ^ low,
        };
        let index = usize::try_from((offset & !low) + lane).ok()?;
        (index < self.data.len()).then_some(index)
    }

    /// Reads `size` bytes at `offset`; bytes past the end read as all ones.
    #[must_use]
    pub fn read(&self, offset: u64, size: AccessSize) -> u64 {
        match size.half() {
            None => self
                .storage_index(offset)
                .map_or(0xFF, |index| u64::from(self.data[index])),
            Some(half) => {
                let shift = 8 * u32::from(half.bytes());
                let first = self.read(offset, half);
                let second = self.read(offset.wrapping_add(u64::from(half.bytes())), half);
                match self.endianness {
                    Endianness::Little => first | (second << shift),
                    Endianness::Big => (first << shift) | second,
                }
            }
        }
    }

    /// Writes `size` bytes at `offset`; bytes past the end are dropped.
    pub fn write(&mut self, offset: u64, size: AccessSize, value: u64) {
        match size.half() {
            None => {
                if let Some(index) = self.storage_index(offset) {
                    self.data[index] = value.to_le_bytes()[0];
                }
            }
            Some(half) => {
                let shift = 8 * u32::from(half.bytes());
                let low = value & half.mask();
                let high = (value >> shift) & half.mask();
                let (first, second) = match self.endianness {
                    Endianness::Little => (low, high),
                    Endianness::Big => (high, low),
                };
                self.write(offset, half, first);
                self.write(offset.wrapping_add(u64::from(half.bytes())), half, second);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BlobAccessor;
    use crate::memory::{AccessSize, Endianness};

    #[test]
    fn big_endian_word_blob_mirrors_lanes() {
        let mut data = vec![0x34, 0x12, 0x78, 0x56];
        let blob = BlobAccessor::new(&mut data, 2, Endianness::Big);
        assert_eq!(blob.read(0, AccessSize::Byte), 0x12);
        assert_eq!(blob.read(1, AccessSize::Byte), 0x34);
        assert_eq!(blob.read(0, AccessSize::Word), 0x1234);
        assert_eq!(blob.read(0, AccessSize::Dword), 0x1234_5678);
    }

    #[test]
    fn little_endian_byte_blob_is_flat() {
        let mut data = vec![0x01, 0x02, 0x03];
        let mut blob = BlobAccessor::new(&mut data, 1, Endianness::Little);
        assert_eq!(blob.read(1, AccessSize::Word), 0x0302);
        assert_eq!(blob.read(2, AccessSize::Word), 0xFF03);
        blob.write(0, AccessSize::Word, 0xBEEF);
        assert_eq!(blob.len(), 3);
        assert_eq!(data, vec![0xEF, 0xBE, 0x03]);
    }

    #[test]
    fn odd_widths_fall_back_to_bytes() {
        let mut data = vec![0xAA, 0xBB];
        let blob = BlobAccessor::new(&mut data, 3, Endianness::Big);
        assert_eq!(blob.read(0, AccessSize::Byte), 0xAA);
    }
}
