//! System Description Table (SDT) header and checksum utilities.

use crate::bytes::{read_u32, write_u32};
use crate::{AcpiError, AcpiHandler};

/// Standard ACPI System Description Table header.
///
/// This 36-byte header is present at the start of every ACPI table
/// (RSDT, XSDT, MADT, FADT, DSDT, SSDT, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdtHeader {
    /// 4-byte ASCII signature identifying the table type.
    pub signature: [u8; 4],
    /// Total length of the table, including the header, in bytes.
    pub length: u32,
    /// Revision of the table structure.
    pub revision: u8,
    /// Checksum byte. The entire table, including the header, must sum to zero.
    pub checksum: u8,
    /// OEM-supplied identification string.
    pub oem_id: [u8; 6],
    /// OEM-supplied table identification string.
    pub oem_table_id: [u8; 8],
    /// OEM-supplied revision number.
    pub oem_revision: u32,
    /// Vendor ID of the utility that created the table.
    pub creator_id: [u8; 4],
    /// Revision of the utility that created the table.
    pub creator_revision: u32,
}

impl SdtHeader {
    /// The size of an SDT header in bytes.
    pub const SIZE: usize = 36;

    /// Byte offset of the `length` field.
    pub const LENGTH_OFFSET: usize = 4;
    /// Byte offset of the `revision` field.
    pub const REVISION_OFFSET: usize = 8;
    /// Byte offset of the `checksum` field.
    pub const CHECKSUM_OFFSET: usize = 9;

    /// Read an [`SdtHeader`] from a byte slice.
    ///
    /// Returns `None` if the slice is shorter than [`SdtHeader::SIZE`] bytes.
    #[must_use]
    pub fn read_from_bytes(data: &[u8]) -> Option<Self> {
        let raw: &[u8; Self::SIZE] = data.get(..Self::SIZE)?.try_into().ok()?;
        let mut header = Self {
            signature: [0; 4],
            length: read_u32(raw, 4)?,
            revision: raw[8],
            checksum: raw[9],
            oem_id: [0; 6],
            oem_table_id: [0; 8],
            oem_revision: read_u32(raw, 24)?,
            creator_id: [0; 4],
            creator_revision: read_u32(raw, 32)?,
        };
        header.signature.copy_from_slice(&raw[0..4]);
        header.oem_id.copy_from_slice(&raw[10..16]);
        header.oem_table_id.copy_from_slice(&raw[16..24]);
        header.creator_id.copy_from_slice(&raw[28..32]);
        Some(header)
    }

    /// Serialize this header into the first [`SdtHeader::SIZE`] bytes of `out`.
    ///
    /// Returns `None` if `out` is too short.
    pub fn write_to(&self, out: &mut [u8]) -> Option<()> {
        let raw = out.get_mut(..Self::SIZE)?;
        raw[0..4].copy_from_slice(&self.signature);
        write_u32(raw, 4, self.length)?;
        raw[8] = self.revision;
        raw[9] = self.checksum;
        raw[10..16].copy_from_slice(&self.oem_id);
        raw[16..24].copy_from_slice(&self.oem_table_id);
        write_u32(raw, 24, self.oem_revision)?;
        raw[28..32].copy_from_slice(&self.creator_id);
        write_u32(raw, 32, self.creator_revision)?;
        Some(())
    }

    /// Returns the 4-byte signature.
    #[must_use]
    pub fn signature(&self) -> [u8; 4] {
        self.signature
    }

    /// Returns the total length of this table (header included).
    #[must_use]
    pub fn length(&self) -> u32 {
        self.length
    }
}

/// Mapped ACPI table data with a validated header.
///
/// Returned by [`load_table`] after performing the standard map-header,
/// verify-signature, map-full, validate-checksum sequence.
pub struct ValidatedTable {
    /// The validated SDT header.
    pub header: SdtHeader,
    /// The full table data (including header), checksum-validated.
    pub data: &'static [u8],
}

impl ValidatedTable {
    /// Returns the table body that follows the SDT header.
    #[must_use]
    pub fn body(&self) -> &'static [u8] {
        self.data.get(SdtHeader::SIZE..).unwrap_or(&[])
    }
}

/// Reads just the header of the table at `phys`.
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`] if the header cannot be read.
pub fn read_header(handler: &impl AcpiHandler, phys: u64) -> Result<SdtHeader, AcpiError> {
    // SAFETY: Caller provides a physical address of an ACPI table.
    let header_data = unsafe { handler.map_physical_region(phys, SdtHeader::SIZE) };
    SdtHeader::read_from_bytes(header_data).ok_or(AcpiError::TruncatedData)
}

/// Maps and validates an ACPI table at the given physical address.
///
/// Performs the standard 4-step ACPI table loading sequence:
/// 1. Map the SDT header to learn the table length
/// 2. Verify the 4-byte signature matches `expected_signature`
/// 3. Map the full table
/// 4. Validate the checksum
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`] if the header cannot be read or
/// declares a length shorter than itself, [`AcpiError::InvalidSignature`] if
/// the signature doesn't match, or [`AcpiError::InvalidChecksum`] if the
/// checksum fails.
pub fn load_table(
    handler: &impl AcpiHandler,
    phys: u64,
    expected_signature: &[u8; 4],
) -> Result<ValidatedTable, AcpiError> {
    if phys == 0 {
        return Err(AcpiError::TableNotFound);
    }
    let header = read_header(handler, phys)?;

    if &header.signature() != expected_signature {
        return Err(AcpiError::InvalidSignature);
    }

    let total_len = header.length() as usize;
    if total_len < SdtHeader::SIZE {
        return Err(AcpiError::TruncatedData);
    }

    // SAFETY: phys is valid, total_len comes from the validated header.
    let data = unsafe { handler.map_physical_region(phys, total_len) };

    if !validate_checksum(data) {
        return Err(AcpiError::InvalidChecksum);
    }

    Ok(ValidatedTable { header, data })
}

/// Returns the 8-bit sum of every byte in `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Validate the checksum of a byte slice.
///
/// ACPI tables are designed so that the sum of all bytes in the table equals
/// zero (mod 256). This function computes that sum and returns `true` when
/// the checksum is valid.
#[must_use]
pub fn validate_checksum(data: &[u8]) -> bool {
    checksum(data) == 0
}

/// Recompute the checksum byte of a complete table in place.
///
/// The byte at [`SdtHeader::CHECKSUM_OFFSET`] is zeroed, then set to the
/// two's complement of the sum of the remaining bytes so that the whole
/// slice sums to zero. `table` must cover exactly the table's `length`.
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`] if `table` is shorter than an SDT
/// header.
pub fn set_checksum(table: &mut [u8]) -> Result<(), AcpiError> {
    if table.len() < SdtHeader::SIZE {
        return Err(AcpiError::TruncatedData);
    }
    set_checksum_at(table, SdtHeader::CHECKSUM_OFFSET)
}

/// Like [`set_checksum`], but for a structure whose checksum byte lives at
/// `offset` (the RSDP keeps two of them).
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`] if `offset` is outside `region`.
pub fn set_checksum_at(region: &mut [u8], offset: usize) -> Result<(), AcpiError> {
    if offset >= region.len() {
        return Err(AcpiError::TruncatedData);
    }
    region[offset] = 0;
    region[offset] = checksum(region).wrapping_neg();
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec;

    use super::*;

    fn sample_header(length: u32) -> SdtHeader {
        SdtHeader {
            signature: *b"SSDT",
            length,
            revision: 1,
            checksum: 0,
            oem_id: *b"INTEL ",
            oem_table_id: *b"PPM RCM ",
            oem_revision: 0x8000_0001,
            creator_id: *b"INTL",
            creator_revision: 0x2006_1109,
        }
    }

    #[test]
    fn header_survives_serialization() {
        let mut raw = [0u8; SdtHeader::SIZE];
        let header = sample_header(0x1234);
        header.write_to(&mut raw).unwrap();
        assert_eq!(&raw[0..4], b"SSDT");
        assert_eq!(SdtHeader::read_from_bytes(&raw), Some(header));
    }

    #[test]
    fn set_checksum_zeroes_the_sum() {
        let mut table = vec![0u8; 64];
        sample_header(64).write_to(&mut table).unwrap();
        for (i, byte) in table.iter_mut().enumerate().skip(SdtHeader::SIZE) {
            *byte = (i * 7) as u8;
        }
        table[SdtHeader::CHECKSUM_OFFSET] = 0xAA;
        set_checksum(&mut table).unwrap();
        assert!(validate_checksum(&table));

        table[40] ^= 0x10;
        assert!(!validate_checksum(&table));
        set_checksum(&mut table).unwrap();
        assert_eq!(checksum(&table), 0);
    }

    #[test]
    fn short_regions_are_rejected() {
        let mut tiny = [1u8; 4];
        assert_eq!(set_checksum(&mut tiny), Err(AcpiError::TruncatedData));
        assert!(SdtHeader::read_from_bytes(&tiny).is_none());
    }
}
