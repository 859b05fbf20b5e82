//! Fixed ACPI Description Table (FADT) parsing and patching.
//!
//! The FADT locates the DSDT and FACS, and publishes the fixed power
//! management register blocks. Pre-OS setup rewrites those blocks to the
//! chipset's PM base and declares legacy C2/C3 unsupported so the OS uses
//! the `_CST` objects instead.

use bitflags::bitflags;

use crate::bytes::{read_u8, read_u32, read_u64, write_u8, write_u16, write_u32};
use crate::gas::{GenericAddress, space};
use crate::{AcpiError, AcpiHandler};

/// FADT table signature.
pub const FADT_SIGNATURE: &[u8; 4] = b"FACP";

/// DSDT table signature.
pub const DSDT_SIGNATURE: &[u8; 4] = b"DSDT";

/// FACS signature.
pub const FACS_SIGNATURE: &[u8; 4] = b"FACS";

bitflags! {
    /// FADT fixed feature flags (offset 112).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FadtFlags: u32 {
        /// WBINVD is supported.
        const WBINVD = 1 << 0;
        /// WBINVD flushes caches without invalidating.
        const WBINVD_FLUSH = 1 << 1;
        /// C1 is supported on all processors.
        const PROC_C1 = 1 << 2;
        /// C2 works on multiprocessor systems.
        const P_LVL2_UP = 1 << 3;
    }
}

/// Legacy C2 latency meaning "C2 not supported".
pub const C2_LATENCY_UNSUPPORTED: u16 = 101;
/// Legacy C3 latency meaning "C3 not supported".
pub const C3_LATENCY_UNSUPPORTED: u16 = 1001;

/// Parsed FADT --- only the fields the power-management pass needs.
#[derive(Debug, Clone, Copy)]
pub struct Fadt {
    /// Table revision.
    pub revision: u8,
    /// Physical address of the FACS (Firmware ACPI Control Structure).
    ///
    /// 32-bit field at offset 36. Zero if not present.
    pub firmware_ctrl: u32,
    /// Physical address of the DSDT (Differentiated System Description Table).
    ///
    /// 32-bit field at offset 40. Zero if not present.
    pub dsdt: u32,
    /// Fixed feature flags.
    pub flags: FadtFlags,
    /// 64-bit physical address of the FACS (ACPI 2.0+).
    pub x_firmware_ctrl: u64,
    /// 64-bit physical address of the DSDT (ACPI 2.0+).
    pub x_dsdt: u64,
}

impl Fadt {
    /// Byte offset of `firmware_ctrl` within the FADT.
    const FIRMWARE_CTRL_OFFSET: usize = 36;
    /// Byte offset of `dsdt` within the FADT.
    const DSDT_OFFSET: usize = 40;
    /// Byte offset of `PM1a_EVT_BLK`.
    const PM1A_EVT_BLK_OFFSET: usize = 56;
    /// Byte offset of `PM1a_CNT_BLK`.
    const PM1A_CNT_BLK_OFFSET: usize = 64;
    /// Byte offset of `PM2_CNT_BLK`.
    const PM2_CNT_BLK_OFFSET: usize = 72;
    /// Byte offset of `PM_TMR_BLK`.
    const PM_TMR_BLK_OFFSET: usize = 76;
    /// Byte offset of `PM1_EVT_LEN`; the three following lengths are adjacent.
    const PM1_EVT_LEN_OFFSET: usize = 88;
    /// Byte offset of `P_LVL2_LAT`.
    const P_LVL2_LAT_OFFSET: usize = 96;
    /// Byte offset of `P_LVL3_LAT`.
    const P_LVL3_LAT_OFFSET: usize = 98;
    /// Byte offset of `flags` within the FADT.
    const FLAGS_OFFSET: usize = 112;
    /// Byte offset of `x_firmware_ctrl` within the FADT (ACPI 2.0+).
    const X_FIRMWARE_CTRL_OFFSET: usize = 132;
    /// Byte offset of `x_dsdt` within the FADT (ACPI 2.0+).
    const X_DSDT_OFFSET: usize = 140;
    /// Byte offset of `X_PM1a_EVT_BLK`.
    const X_PM1A_EVT_BLK_OFFSET: usize = 148;
    /// Byte offset of `X_PM1a_CNT_BLK`.
    const X_PM1A_CNT_BLK_OFFSET: usize = 172;
    /// Byte offset of `X_PM2_CNT_BLK`.
    const X_PM2_CNT_BLK_OFFSET: usize = 196;
    /// Byte offset of `X_PM_TMR_BLK`.
    const X_PM_TMR_BLK_OFFSET: usize = 208;

    /// Minimum length of an ACPI 1.0 FADT.
    const V1_LENGTH: usize = 116;
    /// Minimum length with the extended register blocks.
    const X_BLOCKS_LENGTH: usize = Self::X_PM_TMR_BLK_OFFSET + GenericAddress::SIZE;

    /// Parse a FADT from the given physical address.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::InvalidSignature`] if the table signature is not
    /// `FACP`, or [`AcpiError::InvalidChecksum`] if the checksum is invalid.
    pub fn parse(handler: &impl AcpiHandler, phys: u64) -> Result<Self, AcpiError> {
        let table = crate::sdt::load_table(handler, phys, FADT_SIGNATURE)?;
        Ok(Self::read_fields(table.data))
    }

    /// Read the needed fields, with zero defaults for fields an older,
    /// shorter revision does not carry.
    fn read_fields(data: &[u8]) -> Self {
        Self {
            revision: read_u8(data, crate::sdt::SdtHeader::REVISION_OFFSET).unwrap_or(0),
            firmware_ctrl: read_u32(data, Self::FIRMWARE_CTRL_OFFSET).unwrap_or(0),
            dsdt: read_u32(data, Self::DSDT_OFFSET).unwrap_or(0),
            flags: FadtFlags::from_bits_retain(read_u32(data, Self::FLAGS_OFFSET).unwrap_or(0)),
            x_firmware_ctrl: read_u64(data, Self::X_FIRMWARE_CTRL_OFFSET).unwrap_or(0),
            x_dsdt: read_u64(data, Self::X_DSDT_OFFSET).unwrap_or(0),
        }
    }

    /// Returns the physical address of the DSDT.
    ///
    /// Prefers the 32-bit `dsdt` field, which legacy firmware always fills,
    /// and falls back to `x_dsdt`. Returns `None` if both are zero.
    #[must_use]
    pub fn dsdt_address(&self) -> Option<u64> {
        if self.dsdt != 0 {
            Some(u64::from(self.dsdt))
        } else if self.x_dsdt != 0 {
            Some(self.x_dsdt)
        } else {
            None
        }
    }

    /// Returns the physical address of the FACS.
    ///
    /// Prefers the 32-bit `firmware_ctrl` field and falls back to
    /// `x_firmware_ctrl`. Returns `None` if both are zero.
    #[must_use]
    pub fn facs_address(&self) -> Option<u64> {
        if self.firmware_ctrl != 0 {
            Some(u64::from(self.firmware_ctrl))
        } else if self.x_firmware_ctrl != 0 {
            Some(self.x_firmware_ctrl)
        } else {
            None
        }
    }
}

/// Point the FADT at `pm_base` and mark legacy C2/C3 unsupported.
///
/// Rewrites the PM1a event/control, PM2 control and PM timer blocks and
/// their lengths, sets the legacy latencies to their "unsupported" values,
/// sets [`FadtFlags::PROC_C1`] and clears [`FadtFlags::P_LVL2_UP`]. Revision
/// 3+ tables also get matching extended (GAS) register blocks. The checksum
/// is recomputed last.
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`] if the table is shorter than its
/// revision requires, or any error from loading the table.
pub fn patch_pm_blocks(handler: &impl AcpiHandler, phys: u64, pm_base: u32) -> Result<(), AcpiError> {
    let header = crate::sdt::load_table(handler, phys, FADT_SIGNATURE)?.header;
    let len = header.length() as usize;
    if len < Fadt::V1_LENGTH || (header.revision >= 3 && len < Fadt::X_BLOCKS_LENGTH) {
        return Err(AcpiError::TruncatedData);
    }

    // SAFETY: The table was validated above and is `len` bytes long.
    let data = unsafe { handler.map_physical_region_mut(phys, len) };
    write_legacy_blocks(data, pm_base).ok_or(AcpiError::TruncatedData)?;
    if header.revision >= 3 {
        write_extended_blocks(data, pm_base).ok_or(AcpiError::TruncatedData)?;
    }
    crate::sdt::set_checksum(data)?;

    log::debug!("FADT {phys:#x}: PM blocks moved to {pm_base:#x}");
    Ok(())
}

fn write_legacy_blocks(data: &mut [u8], pm_base: u32) -> Option<()> {
    write_u32(data, Fadt::PM1A_EVT_BLK_OFFSET, pm_base)?;
    write_u32(data, Fadt::PM1A_CNT_BLK_OFFSET, pm_base + 4)?;
    write_u32(data, Fadt::PM2_CNT_BLK_OFFSET, pm_base + 0x50)?;
    write_u32(data, Fadt::PM_TMR_BLK_OFFSET, pm_base + 8)?;

    for (i, len) in [4u8, 2, 1, 4].into_iter().enumerate() {
        write_u8(data, Fadt::PM1_EVT_LEN_OFFSET + i, len)?;
    }

    write_u16(data, Fadt::P_LVL2_LAT_OFFSET, C2_LATENCY_UNSUPPORTED)?;
    write_u16(data, Fadt::P_LVL3_LAT_OFFSET, C3_LATENCY_UNSUPPORTED)?;

    let mut flags = FadtFlags::from_bits_retain(read_u32(data, Fadt::FLAGS_OFFSET)?);
    flags.insert(FadtFlags::PROC_C1);
    flags.remove(FadtFlags::P_LVL2_UP);
    write_u32(data, Fadt::FLAGS_OFFSET, flags.bits())
}

fn write_extended_blocks(data: &mut [u8], pm_base: u32) -> Option<()> {
    let pm_base = u64::from(pm_base);
    let blocks = [
        (Fadt::X_PM1A_EVT_BLK_OFFSET, 0x20, pm_base),
        (Fadt::X_PM1A_CNT_BLK_OFFSET, 0x10, pm_base + 4),
        (Fadt::X_PM2_CNT_BLK_OFFSET, 0x08, pm_base + 0x50),
        (Fadt::X_PM_TMR_BLK_OFFSET, 0x20, pm_base + 8),
    ];
    for (offset, width, address) in blocks {
        GenericAddress::new(space::SYSTEM_IO, width, 0, 0, address).write_at(data, offset)?;
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestMemory;
    use crate::validate_checksum;

    const FADT: u64 = 0x10_0000;

    #[test]
    fn legacy_fields_are_rewritten() {
        let mem = TestMemory::low_memory();
        mem.put_fadt(FADT, 1, 0x10_3000, 0x10_2000);
        mem.write_u32(FADT + 112, FadtFlags::P_LVL2_UP.bits() | FadtFlags::WBINVD.bits());
        crate::rsdt::refresh_checksum(&mem, FADT).unwrap();

        patch_pm_blocks(&mem, FADT, 0x400).unwrap();

        assert_eq!(mem.read_u32(FADT + 56), 0x400);
        assert_eq!(mem.read_u32(FADT + 64), 0x404);
        assert_eq!(mem.read_u32(FADT + 72), 0x450);
        assert_eq!(mem.read_u32(FADT + 76), 0x408);
        assert_eq!(mem.bytes(FADT + 88, 4), [4, 2, 1, 4]);
        assert_eq!(mem.read_u16(FADT + 96), 101);
        assert_eq!(mem.read_u16(FADT + 98), 1001);
        assert_eq!(mem.read_u32(FADT + 112), (FadtFlags::PROC_C1 | FadtFlags::WBINVD).bits());
        // Revision 1 tables have no extended blocks.
        assert!(validate_checksum(mem.table(FADT)));
    }

    #[test]
    fn revision_three_gets_extended_blocks() {
        let mem = TestMemory::low_memory();
        mem.put_fadt(FADT, 4, 0x10_3000, 0x10_2000);

        patch_pm_blocks(&mem, FADT, 0x1000).unwrap();

        assert_eq!(mem.bytes(FADT + 148, 4), [1, 0x20, 0, 0]);
        assert_eq!(mem.read_u64(FADT + 152), 0x1000);
        assert_eq!(mem.bytes(FADT + 172, 4), [1, 0x10, 0, 0]);
        assert_eq!(mem.read_u64(FADT + 176), 0x1004);
        assert_eq!(mem.bytes(FADT + 196, 4), [1, 0x08, 0, 0]);
        assert_eq!(mem.read_u64(FADT + 200), 0x1050);
        assert_eq!(mem.bytes(FADT + 208, 4), [1, 0x20, 0, 0]);
        assert_eq!(mem.read_u64(FADT + 212), 0x1008);
        assert!(validate_checksum(mem.table(FADT)));
    }

    #[test]
    fn pointers_prefer_the_legacy_fields() {
        let mem = TestMemory::low_memory();
        mem.put_fadt(FADT, 4, 0x10_3000, 0x10_2000);
        let fadt = Fadt::parse(&mem, FADT).unwrap();
        assert_eq!(fadt.revision, 4);
        assert_eq!(fadt.dsdt_address(), Some(0x10_2000));
        assert_eq!(fadt.facs_address(), Some(0x10_3000));
    }
}
