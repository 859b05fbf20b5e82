//! Generic Address Structure (GAS).

use crate::bytes::write_u64;

/// Address space identifiers used by the power-management registers.
pub mod space {
    /// System memory.
    pub const SYSTEM_MEMORY: u8 = 0x00;
    /// System I/O ports.
    pub const SYSTEM_IO: u8 = 0x01;
    /// Functional fixed hardware (MSR-backed on Intel).
    pub const FUNCTIONAL_FIXED_HW: u8 = 0x7F;
}

/// A 12-byte ACPI Generic Address Structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenericAddress {
    /// Address space (see [`space`]).
    pub space_id: u8,
    /// Register width in bits.
    pub bit_width: u8,
    /// Bit offset within the register.
    pub bit_offset: u8,
    /// Access size (ACPI 3.0+), or a vendor-specific meaning for FFH.
    pub access_size: u8,
    /// Register address.
    pub address: u64,
}

impl GenericAddress {
    /// Encoded size in bytes.
    pub const SIZE: usize = 12;

    /// Construct a GAS.
    #[must_use]
    pub const fn new(space_id: u8, bit_width: u8, bit_offset: u8, access_size: u8, address: u64) -> Self {
        Self {
            space_id,
            bit_width,
            bit_offset,
            access_size,
            address,
        }
    }

    /// Returns the little-endian wire encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut raw = [0u8; Self::SIZE];
        raw[0] = self.space_id;
        raw[1] = self.bit_width;
        raw[2] = self.bit_offset;
        raw[3] = self.access_size;
        raw[4..].copy_from_slice(&self.address.to_le_bytes());
        raw
    }

    /// Write the encoding at `offset` inside `data`.
    pub fn write_at(&self, data: &mut [u8], offset: usize) -> Option<()> {
        let raw = data.get_mut(offset..offset.checked_add(Self::SIZE)?)?;
        raw[..4].copy_from_slice(&[self.space_id, self.bit_width, self.bit_offset, self.access_size]);
        write_u64(raw, 4, self.address)
    }
}
