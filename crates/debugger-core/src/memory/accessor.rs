//! Translation-aware debugger accessor for one device address space.
//!
//! Every access is masked to the space's logical byte range, optionally translated, routed
//! through the device's custom handler first, and falls back to an aligned bus access.
//! Misaligned multi-byte accesses are split recursively into half-size accesses and
//! recombined by the space's endianness. Failed translations read as all ones and drop writes.

use crate::api::MemoryInterface;
use crate::memory::{AccessSize, AddressSpaceInfo, Endianness, TranslateIntent};

/// Byte-lane XOR applied to the offset within a bus word when fetching `size` bytes from a
/// `bus_bytes`-wide bus. Combinations outside the table are rejected.
#[must_use]
pub const fn lane_xor(bus_bytes: u8, size: AccessSize, endianness: Endianness) -> Option<u64> {
    let size = size.bytes();
    match (bus_bytes, size) {
        (1, 1) | (2, 2) | (4, 4) | (8, 8) => Some(0),
        (2, 1) | (4, 1 | 2) | (8, 1 | 2 | 4) => Some(if endianness.is_big() {
            (bus_bytes - size) as u64
        } else {
            0
        }),
        _ => None,
    }
}

/// Combines two half-size values read from consecutive addresses.
const fn combine(first: u64, second: u64, half: AccessSize, endianness: Endianness) -> u64 {
    let shift = 8 * half.bytes() as u32;
    match endianness {
        Endianness::Little => first | (second << shift),
        Endianness::Big => (first << shift) | second,
    }
}

/// Splits a value into the halves destined for `address` and `address + half`.
const fn split(value: u64, half: AccessSize, endianness: Endianness) -> (u64, u64) {
    let shift = 8 * half.bytes() as u32;
    let low = value & half.mask();
    let high = (value >> shift) & half.mask();
    match endianness {
        Endianness::Little => (low, high),
        Endianness::Big => (high, low),
    }
}

/// Debugger view of one address space of one device.
pub struct SpaceAccessor<'a> {
    memory: &'a mut dyn MemoryInterface,
    info: &'a AddressSpaceInfo,
    space: usize,
}

impl std::fmt::Debug for SpaceAccessor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceAccessor")
            .field("space", &self.space)
            .field("name", &self.info.name())
            .finish_non_exhaustive()
    }
}

impl<'a> SpaceAccessor<'a> {
    /// Binds the accessor to space `space` of `memory`.
    #[must_use]
    pub const fn new(memory: &'a mut dyn MemoryInterface, info: &'a AddressSpaceInfo, space: usize) -> Self {
        Self {
            memory,
            info,
            space,
        }
    }

    /// Space geometry.
    #[must_use]
    pub const fn info(&self) -> &AddressSpaceInfo {
        self.info
    }

    /// Translates a logical byte address; `None` when unmapped.
    pub fn translate(&mut self, intent: TranslateIntent, address: u64) -> Option<u64> {
        self.memory.translate(self.space, intent, address)
    }

    /// Reads `size` bytes at logical byte address `address`.
    pub fn read(&mut self, address: u64, size: AccessSize, translate: bool) -> u64 {
        self.memory.set_debugger_access(self.space, true);
        let value = self.read_inner(address, size, translate);
        self.memory.set_debugger_access(self.space, false);
        value
    }

    /// Reads `size` bytes, or `None` if translation of the first byte fails.
    pub fn read_checked(&mut self, address: u64, size: AccessSize, translate: bool) -> Option<u64> {
        let address = address & self.info.logical_byte_mask();
        if translate {
            self.translate(TranslateIntent::ReadDebug, address)?;
        }
        Some(self.read(address, size, translate))
    }

    /// Writes `size` bytes at logical byte address `address`.
    pub fn write(&mut self, address: u64, size: AccessSize, value: u64, translate: bool) {
        self.memory.set_debugger_access(self.space, true);
        self.write_inner(address, size, value & size.mask(), translate);
        self.memory.set_debugger_access(self.space, false);
    }

    /// Fetches `size` opcode (`decrypted`) or argument bytes.
    pub fn read_opcode(&mut self, address: u64, size: AccessSize, decrypted: bool) -> u64 {
        self.memory.set_debugger_access(self.space, true);
        let value = self.read_opcode_inner(address, size, decrypted);
        self.memory.set_debugger_access(self.space, false);
        value
    }

    fn read_inner(&mut self, address: u64, size: AccessSize, translate: bool) -> u64 {
        let address = address & self.info.logical_byte_mask();
        if let Some(half) = size.half() {
            if address & u64::from(size.bytes() - 1) != 0 {
                let first = self.read_inner(address, half, translate);
                let second = self.read_inner(address.wrapping_add(u64::from(half.bytes())), half, translate);
                return combine(first, second, half, self.info.endianness());
            }
        }
        let physical = if translate {
            match self.memory.translate(self.space, TranslateIntent::ReadDebug, address) {
                Some(physical) => physical,
                None => {
                    log::trace!("{}: read at {address:X} is unmapped", self.info.name());
                    return size.mask();
                }
            }
        } else {
            address
        };
        self.memory
            .read_override(self.space, physical, size)
            .unwrap_or_else(|| self.memory.read(self.space, physical, size))
            & size.mask()
    }

    fn write_inner(&mut self, address: u64, size: AccessSize, value: u64, translate: bool) {
        let address = address & self.info.logical_byte_mask();
        if let Some(half) = size.half() {
            if address & u64::from(size.bytes() - 1) != 0 {
                let (first, second) = split(value, half, self.info.endianness());
                self.write_inner(address, half, first, translate);
                self.write_inner(address.wrapping_add(u64::from(half.bytes())), half, second, translate);
                return;
            }
        }
        let physical = if translate {
            match self.memory.translate(self.space, TranslateIntent::WriteDebug, address) {
                Some(physical) => physical,
                None => {
                    log::trace!("{}: write at {address:X} is unmapped", self.info.name());
                    return;
                }
            }
        } else {
            address
        };
        if !self.memory.write_override(self.space, physical, size, value) {
            self.memory.write(self.space, physical, size, value);
        }
    }

    fn read_opcode_inner(&mut self, address: u64, size: AccessSize, decrypted: bool) -> u64 {
        let address = address & self.info.logical_byte_mask();
        if let Some(value) = self.memory.read_opcode_override(self.space, address, size) {
            return value & size.mask();
        }
        let bus = self.info.bus_bytes().max(1);
        if let Some(half) = size.half() {
            if size.bytes() > bus || address & u64::from(size.bytes() - 1) != 0 {
                let first = self.read_opcode_inner(address, half, decrypted);
                let second =
                    self.read_opcode_inner(address.wrapping_add(u64::from(half.bytes())), half, decrypted);
                return combine(first, second, half, self.info.endianness());
            }
        }
        let Some(physical) = self
            .memory
            .translate(self.space, TranslateIntent::FetchDebug, address)
        else {
            return size.mask();
        };
        let physical = physical & self.info.byte_mask();
        let Some(xor) = lane_xor(bus, size, self.info.endianness()) else {
            log::warn!(
                "{}: no opcode lane mapping for {bus}-byte bus and {}-byte fetch",
                self.info.name(),
                size.bytes()
            );
            return size.mask();
        };
        let low_bits = u64::from(bus - 1);
        let Some(word) = self
            .memory
            .opcode_word(self.space, physical & !low_bits, decrypted)
        else {
            return size.mask();
        };
        let shift = 8 * ((physical & low_bits) ^ xor);
        (word >> shift) & size.mask()
    }
}

#[cfg(test)]
mod tests {
    use super::{lane_xor, SpaceAccessor};
    use crate::memory::{AccessSize, AddressSpaceConfig, AddressSpaceInfo, Endianness};
    use crate::testing::FlatMemory;
    use rstest::rstest;

    fn space(bus_bits: u8, endianness: Endianness) -> AddressSpaceInfo {
        AddressSpaceInfo::new(AddressSpaceConfig::new("program", bus_bits, 16).with_endianness(endianness))
    }

    #[rstest]
    #[case(1, 1, Endianness::Big, Some(0))]
    #[case(2, 1, Endianness::Little, Some(0))]
    #[case(2, 1, Endianness::Big, Some(1))]
    #[case(4, 2, Endianness::Big, Some(2))]
    #[case(8, 1, Endianness::Big, Some(7))]
    #[case(8, 4, Endianness::Big, Some(4))]
    #[case(4, 4, Endianness::Big, Some(0))]
    #[case(1, 2, Endianness::Little, None)]
    #[case(2, 8, Endianness::Big, None)]
    fn lane_table_covers_documented_pairs(
        #[case] bus: u8,
        #[case] size: u8,
        #[case] endianness: Endianness,
        #[case] expected: Option<u64>,
    ) {
        let size = AccessSize::from_bytes(size).unwrap();
        assert_eq!(lane_xor(bus, size, endianness), expected);
    }

    #[test]
    fn misaligned_word_read_splits_little_endian() {
        let info = space(16, Endianness::Little);
        let mut memory = FlatMemory::new(vec![Some(info.config().clone())]);
        memory.load(0, 0x10, &[0x11, 0x22, 0x33, 0x44]);
        let mut accessor = SpaceAccessor::new(&mut memory, &info, 0);
        assert_eq!(accessor.read(0x11, AccessSize::Word, true), 0x3322);
        assert_eq!(accessor.read(0x11, AccessSize::Dword, true), 0x0044_3322);
    }

    #[test]
    fn misaligned_word_read_splits_big_endian() {
        let info = space(16, Endianness::Big);
        let mut memory = FlatMemory::new(vec![Some(info.config().clone())]);
        memory.load(0, 0x10, &[0x11, 0x22, 0x33, 0x44]);
        let mut accessor = SpaceAccessor::new(&mut memory, &info, 0);
        assert_eq!(accessor.read(0x11, AccessSize::Word, true), 0x2233);
        assert_eq!(accessor.read(0x10, AccessSize::Dword, true), 0x1122_3344);
    }

    #[test]
    fn failed_translation_saturates_reads_and_drops_writes() {
        let info = space(8, Endianness::Little);
        let mut memory = FlatMemory::new(vec![Some(info.config().clone())]);
        memory.unmap(0, 0x8000..0x9000);
        let mut accessor = SpaceAccessor::new(&mut memory, &info, 0);
        assert_eq!(accessor.read(0x8000, AccessSize::Word, true), 0xFFFF);
        assert_eq!(accessor.read_checked(0x8000, AccessSize::Byte, true), None);
        accessor.write(0x8000, AccessSize::Byte, 0x12, true);
        assert_eq!(accessor.read(0x8000, AccessSize::Byte, false), 0);
        accessor.write(0x8000, AccessSize::Byte, 0x12, false);
        assert_eq!(accessor.read(0x8000, AccessSize::Byte, false), 0x12);
    }

    #[test]
    fn debugger_access_is_cleared_after_each_call() {
        let info = space(8, Endianness::Little);
        let mut memory = FlatMemory::new(vec![Some(info.config().clone())]);
        SpaceAccessor::new(&mut memory, &info, 0).write(0x20, AccessSize::Dword, 0xDEAD_BEEF, true);
        assert!(!memory.debugger_access(0));
        assert_eq!(memory.debugger_access_count(0), 1);
    }

    #[test]
    fn opcode_fetch_selects_lanes_of_a_big_endian_word_bus() {
        let info = space(16, Endianness::Big);
        let mut memory = FlatMemory::new(vec![Some(info.config().clone())]);
        memory.load(0, 0x100, &[0xAB, 0xCD, 0x12, 0x34]);
        let mut accessor = SpaceAccessor::new(&mut memory, &info, 0);
        assert_eq!(accessor.read_opcode(0x100, AccessSize::Byte, true), 0xAB);
        assert_eq!(accessor.read_opcode(0x101, AccessSize::Byte, true), 0xCD);
        assert_eq!(accessor.read_opcode(0x100, AccessSize::Word, true), 0xABCD);
        assert_eq!(accessor.read_opcode(0x100, AccessSize::Dword, true), 0xABCD_1234);
    }

    #[test]
    fn opcode_fetch_prefers_decrypted_view() {
        let info = space(8, Endianness::Little);
        let mut memory = FlatMemory::new(vec![Some(info.config().clone())]);
        memory.load(0, 0x40, &[0x55]);
        memory.load_decrypted(0, 0x40, &[0xAA]);
        let mut accessor = SpaceAccessor::new(&mut memory, &info, 0);
        assert_eq!(accessor.read_opcode(0x40, AccessSize::Byte, true), 0xAA);
        assert_eq!(accessor.read_opcode(0x40, AccessSize::Byte, false), 0x55);
    }
}
