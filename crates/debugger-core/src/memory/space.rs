//! Address-space descriptions and unit conversions between addresses and bytes.

/// Index of the program space on every device that has one.
pub const PROGRAM_SPACE: usize = 0;
/// Index of the data space.
pub const DATA_SPACE: usize = 1;
/// Index of the I/O space.
pub const IO_SPACE: usize = 2;

/// Byte ordering of a bus or memory blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Endianness {
    /// Least significant byte at the lowest address.
    #[default]
    Little,
    /// Most significant byte at the lowest address.
    Big,
}

impl Endianness {
    /// Returns `true` for big-endian ordering.
    #[must_use]
    pub const fn is_big(self) -> bool {
        matches!(self, Self::Big)
    }
}

/// Width of a single debugger access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum AccessSize {
    /// 8-bit access.
    Byte = 1,
    /// 16-bit access.
    Word = 2,
    /// 32-bit access.
    Dword = 4,
    /// 64-bit access.
    Qword = 8,
}

impl AccessSize {
    /// Validates a byte count; anything outside {1,2,4,8} is rejected.
    #[must_use]
    pub const fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Word),
            4 => Some(Self::Dword),
            8 => Some(Self::Qword),
            _ => None,
        }
    }

    /// Number of bytes covered by this access.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        self as u8
    }

    /// The next smaller access size, or `None` for bytes.
    #[must_use]
    pub const fn half(self) -> Option<Self> {
        match self {
            Self::Byte => None,
            Self::Word => Some(Self::Byte),
            Self::Dword => Some(Self::Word),
            Self::Qword => Some(Self::Dword),
        }
    }

    /// All-ones value of this width.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Dword => 0xFFFF_FFFF,
            Self::Qword => u64::MAX,
        }
    }

    /// Console name used in watchpoint notifications.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Word => "word",
            Self::Dword => "dword",
            Self::Qword => "qword",
        }
    }
}

/// Intent passed to a device's logical-to-physical translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslateIntent {
    /// Bus read.
    Read,
    /// Bus write.
    Write,
    /// Instruction fetch.
    Fetch,
    /// Debugger read; must not have side effects.
    ReadDebug,
    /// Debugger write.
    WriteDebug,
    /// Debugger instruction fetch.
    FetchDebug,
}

impl TranslateIntent {
    /// Returns `true` for the debugger variants.
    #[must_use]
    pub const fn is_debug(self) -> bool {
        matches!(self, Self::ReadDebug | Self::WriteDebug | Self::FetchDebug)
    }
}

/// Identifies one address space of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SpaceRef {
    /// Device index within the machine.
    pub device: usize,
    /// Space index within the device.
    pub space: usize,
}

impl SpaceRef {
    /// Builds a space reference.
    #[must_use]
    pub const fn new(device: usize, space: usize) -> Self {
        Self { device, space }
    }

    /// The program space of `device`.
    #[must_use]
    pub const fn program(device: usize) -> Self {
        Self::new(device, PROGRAM_SPACE)
    }
}

/// Static description a device publishes for one of its spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AddressSpaceConfig {
    /// Space name, e.g. `program`.
    pub name: String,
    /// Data bus width in bits: 8, 16, 32 or 64.
    pub data_width: u8,
    /// Physical address bus width in bits.
    pub address_bits: u8,
    /// Logical address width in bits; zero means the physical width.
    pub logical_address_bits: u8,
    /// Address-to-byte shift; negative when one address covers several bytes.
    pub address_shift: i8,
    /// Bus byte order.
    pub endianness: Endianness,
}

impl AddressSpaceConfig {
    /// Byte-addressed little-endian space with the given bus widths.
    #[must_use]
    pub fn new(name: &str, data_width: u8, address_bits: u8) -> Self {
        Self {
            name: name.to_string(),
            data_width,
            address_bits,
            logical_address_bits: 0,
            address_shift: 0,
            endianness: Endianness::Little,
        }
    }

    /// Builder-style endianness override.
    #[must_use]
    pub const fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Builder-style address shift override.
    #[must_use]
    pub const fn with_address_shift(mut self, shift: i8) -> Self {
        self.address_shift = shift;
        self
    }

    /// Builder-style logical address width override.
    #[must_use]
    pub const fn with_logical_bits(mut self, bits: u8) -> Self {
        self.logical_address_bits = bits;
        self
    }
}

/// Immutable derived geometry of an address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressSpaceInfo {
    config: AddressSpaceConfig,
    address_mask: u64,
    byte_mask: u64,
    logical_address_mask: u64,
    logical_byte_mask: u64,
}

const fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl AddressSpaceInfo {
    /// Derives masks and digit counts from a device's space description.
    #[must_use]
    pub fn new(config: AddressSpaceConfig) -> Self {
        let logical_bits = if config.logical_address_bits == 0 {
            config.address_bits
        } else {
            config.logical_address_bits
        };
        let address_mask = low_mask(u32::from(config.address_bits));
        let logical_address_mask = low_mask(u32::from(logical_bits));
        let mut info = Self {
            config,
            address_mask,
            byte_mask: 0,
            logical_address_mask,
            logical_byte_mask: 0,
        };
        info.byte_mask = info.address_to_byte_end(address_mask);
        info.logical_byte_mask = info.address_to_byte_end(logical_address_mask);
        info
    }

    /// Source description.
    #[must_use]
    pub const fn config(&self) -> &AddressSpaceConfig {
        &self.config
    }

    /// Space name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bus byte order.
    #[must_use]
    pub const fn endianness(&self) -> Endianness {
        self.config.endianness
    }

    /// Data bus width in bytes.
    #[must_use]
    pub const fn bus_bytes(&self) -> u8 {
        self.config.data_width / 8
    }

    /// Address-to-byte shift.
    #[must_use]
    pub const fn address_shift(&self) -> i8 {
        self.config.address_shift
    }

    /// Physical address mask.
    #[must_use]
    pub const fn address_mask(&self) -> u64 {
        self.address_mask
    }

    /// Physical byte-address mask.
    #[must_use]
    pub const fn byte_mask(&self) -> u64 {
        self.byte_mask
    }

    /// Logical address mask.
    #[must_use]
    pub const fn logical_address_mask(&self) -> u64 {
        self.logical_address_mask
    }

    /// Logical byte-address mask.
    #[must_use]
    pub const fn logical_byte_mask(&self) -> u64 {
        self.logical_byte_mask
    }

    /// Hex digits needed to print a physical address.
    #[must_use]
    pub const fn address_chars(&self) -> usize {
        (self.config.address_bits as usize).div_ceil(4)
    }

    /// Hex digits needed to print a logical address.
    #[must_use]
    pub const fn logical_address_chars(&self) -> usize {
        let bits = if self.config.logical_address_bits == 0 {
            self.config.address_bits
        } else {
            self.config.logical_address_bits
        };
        (bits as usize).div_ceil(4)
    }

    /// Converts an address to the byte address of its first byte.
    #[must_use]
    pub const fn address_to_byte(&self, address: u64) -> u64 {
        let shift = self.config.address_shift;
        if shift < 0 {
            address.wrapping_shl(shift.unsigned_abs() as u32)
        } else {
            address >> shift
        }
    }

    /// Converts an address to the byte address of its last byte.
    #[must_use]
    pub const fn address_to_byte_end(&self, address: u64) -> u64 {
        let shift = self.config.address_shift;
        if shift < 0 {
            let s = shift.unsigned_abs() as u32;
            address.wrapping_shl(s) | low_mask(s)
        } else {
            address >> shift
        }
    }

    /// Converts a byte address back to the containing address.
    #[must_use]
    pub const fn byte_to_address(&self, byte: u64) -> u64 {
        let shift = self.config.address_shift;
        if shift < 0 {
            byte >> shift.unsigned_abs()
        } else {
            byte.wrapping_shl(shift.unsigned_abs() as u32)
        }
    }

    /// Converts a byte address to the last address it touches.
    #[must_use]
    pub const fn byte_to_address_end(&self, byte: u64) -> u64 {
        let shift = self.config.address_shift;
        if shift < 0 {
            byte >> shift.unsigned_abs()
        } else {
            let s = shift.unsigned_abs() as u32;
            byte.wrapping_shl(s) | low_mask(s)
        }
    }
}
