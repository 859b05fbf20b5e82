//! Root System Description Pointer (RSDP) discovery.
//!
//! Legacy BIOS firmware publishes the RSDP on a 16-byte boundary inside one
//! of three windows: the first KiB of the Extended BIOS Data Area, or the
//! read-only BIOS areas at `0xE0000` and `0xF0000`.

use crate::bytes::{read_u8, read_u16, read_u32, read_u64, write_u32};
use crate::sdt::{set_checksum_at, validate_checksum};
use crate::{AcpiError, AcpiHandler};

/// RSDP signature (`b"RSD PTR "`).
pub const RSDP_SIGNATURE: &[u8; 8] = b"RSD PTR ";

/// Physical address of the BDA word holding the EBDA real-mode segment.
const EBDA_SEGMENT_POINTER: u64 = 0x40E;
/// Number of EBDA bytes searched.
const EBDA_SEARCH_LEN: usize = 0x400;
/// Fixed BIOS read-only windows, searched after the EBDA.
const BIOS_WINDOWS: [(u64, usize); 2] = [(0xE_0000, 0x1_0000), (0xF_0000, 0x1_0000)];
/// RSDP alignment inside a search window.
const RSDP_ALIGN: usize = 16;

/// Parsed RSDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rsdp {
    /// Physical address the structure was found at.
    pub address: u64,
    /// Structure revision (0 for ACPI 1.0, 2 for ACPI 2.0+).
    pub revision: u8,
    /// 32-bit physical address of the RSDT.
    pub rsdt_address: u32,
    /// Length of the full structure (ACPI 2.0+ only).
    pub length: u32,
    /// 64-bit physical address of the XSDT (ACPI 2.0+ only).
    pub xsdt_address: u64,
    extended_valid: bool,
}

impl Rsdp {
    /// Size of the ACPI 1.0 structure covered by the first checksum.
    pub const V1_SIZE: usize = 20;
    /// Size of the ACPI 2.0+ structure covered by the extended checksum.
    pub const V2_SIZE: usize = 36;

    const CHECKSUM_OFFSET: usize = 8;
    const REVISION_OFFSET: usize = 15;
    const RSDT_OFFSET: usize = 16;
    const LENGTH_OFFSET: usize = 20;
    const XSDT_OFFSET: usize = 24;
    const EXTENDED_CHECKSUM_OFFSET: usize = 32;

    /// Parse and validate the RSDP at `phys`.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::InvalidRsdp`] if the signature or the 20-byte
    /// checksum is wrong.
    pub fn parse(handler: &impl AcpiHandler, phys: u64) -> Result<Self, AcpiError> {
        // SAFETY: The caller points us at a candidate RSDP in low memory.
        let data = unsafe { handler.map_physical_region(phys, Self::V2_SIZE) };
        let v1 = data.get(..Self::V1_SIZE).ok_or(AcpiError::TruncatedData)?;
        if &v1[..8] != RSDP_SIGNATURE || !validate_checksum(v1) {
            return Err(AcpiError::InvalidRsdp);
        }

        let revision = read_u8(data, Self::REVISION_OFFSET).ok_or(AcpiError::TruncatedData)?;
        let length = read_u32(data, Self::LENGTH_OFFSET).unwrap_or(0);
        let extended_valid = revision == 2
            && length as usize == Self::V2_SIZE
            && validate_checksum(&data[..Self::V2_SIZE]);

        Ok(Self {
            address: phys,
            revision,
            rsdt_address: read_u32(data, Self::RSDT_OFFSET).ok_or(AcpiError::TruncatedData)?,
            length,
            xsdt_address: read_u64(data, Self::XSDT_OFFSET).unwrap_or(0),
            extended_valid,
        })
    }

    /// Returns the XSDT address if this is a valid ACPI 2.0 RSDP that
    /// publishes one.
    #[must_use]
    pub fn xsdt(&self) -> Option<u64> {
        (self.extended_valid && self.xsdt_address != 0).then_some(self.xsdt_address)
    }

    /// Point the RSDP at a relocated RSDT and refresh its checksums.
    ///
    /// The extended checksum is refreshed too when the structure carries one,
    /// since it covers the RSDT field as well.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::TruncatedData`] if the mapping is too short.
    pub fn set_rsdt_address(&mut self, handler: &impl AcpiHandler, rsdt: u32) -> Result<(), AcpiError> {
        let len = if self.extended_valid { Self::V2_SIZE } else { Self::V1_SIZE };
        // SAFETY: `self.address` was validated as an RSDP by `parse`.
        let data = unsafe { handler.map_physical_region_mut(self.address, len) };
        write_u32(data, Self::RSDT_OFFSET, rsdt).ok_or(AcpiError::TruncatedData)?;
        set_checksum_at(&mut data[..Self::V1_SIZE], Self::CHECKSUM_OFFSET)?;
        if self.extended_valid {
            set_checksum_at(data, Self::EXTENDED_CHECKSUM_OFFSET)?;
        }
        self.rsdt_address = rsdt;
        Ok(())
    }
}

/// Scan the legacy BIOS windows for a checksum-valid RSDP.
///
/// Returns the physical address of the first match.
///
/// # Errors
///
/// Returns [`AcpiError::RsdpNotFound`] if no window holds one.
pub fn find_rsdp(handler: &impl AcpiHandler) -> Result<u64, AcpiError> {
    // SAFETY: The BIOS data area is always present on legacy platforms.
    let bda = unsafe { handler.map_physical_region(EBDA_SEGMENT_POINTER, 2) };
    let ebda = u64::from(read_u16(bda, 0).unwrap_or(0)) << 4;

    let ebda_window = (ebda != 0).then_some((ebda, EBDA_SEARCH_LEN));
    ebda_window
        .into_iter()
        .chain(BIOS_WINDOWS)
        .find_map(|(base, len)| scan_window(handler, base, len))
        .ok_or(AcpiError::RsdpNotFound)
}

/// Search one window in 16-byte steps for a valid RSDP.
fn scan_window(handler: &impl AcpiHandler, base: u64, len: usize) -> Option<u64> {
    // SAFETY: Search windows are fixed legacy BIOS regions.
    let window = unsafe { handler.map_physical_region(base, len) };
    (0..len.saturating_sub(Rsdp::V1_SIZE - 1))
        .step_by(RSDP_ALIGN)
        .find(|&off| {
            let candidate = &window[off..off + Rsdp::V1_SIZE];
            &candidate[..8] == RSDP_SIGNATURE && validate_checksum(candidate)
        })
        .map(|off| base + off as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestMemory;

    #[test]
    fn finds_rsdp_in_bios_window() {
        let mem = TestMemory::low_memory();
        mem.put_rsdp(0xE_1230, 0, 0x7FE_0000, None);

        assert_eq!(find_rsdp(&mem), Ok(0xE_1230));
        let rsdp = Rsdp::parse(&mem, 0xE_1230).unwrap();
        assert_eq!(rsdp.rsdt_address, 0x7FE_0000);
        assert_eq!(rsdp.xsdt(), None);
    }

    #[test]
    fn ebda_is_searched_first() {
        let mem = TestMemory::low_memory();
        mem.write_u16(0x40E, 0x9FC0);
        mem.put_rsdp(0x9_FC40, 2, 0x1000, Some(0x2000));
        mem.put_rsdp(0xF_0000, 0, 0x3000, None);

        let found = find_rsdp(&mem).unwrap();
        assert_eq!(found, 0x9_FC40);
        let rsdp = Rsdp::parse(&mem, found).unwrap();
        assert_eq!(rsdp.xsdt(), Some(0x2000));
    }

    #[test]
    fn corrupt_checksum_is_skipped() {
        let mem = TestMemory::low_memory();
        mem.put_rsdp(0xE_0010, 0, 0x1000, None);
        mem.write_u8(0xE_0010 + 9, mem.read_u8(0xE_0010 + 9).wrapping_add(1));
        assert_eq!(find_rsdp(&mem), Err(AcpiError::RsdpNotFound));
    }

    #[test]
    fn relocating_rsdt_keeps_both_checksums() {
        let mem = TestMemory::low_memory();
        mem.put_rsdp(0xF_0100, 2, 0x1000, Some(0x2000));
        let mut rsdp = Rsdp::parse(&mem, 0xF_0100).unwrap();
        rsdp.set_rsdt_address(&mem, 0x0FFC).unwrap();

        let reparsed = Rsdp::parse(&mem, 0xF_0100).unwrap();
        assert_eq!(reparsed.rsdt_address, 0x0FFC);
        assert_eq!(reparsed.xsdt(), Some(0x2000));
    }
}
