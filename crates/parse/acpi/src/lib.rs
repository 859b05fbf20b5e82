//! `pmrc-acpi` --- a standalone, `no_std` ACPI table reader, patcher, and
//! AML encoder for firmware power-management setup.
//!
//! This crate provides the table plumbing a pre-OS power-management pass
//! needs: locating the RSDP in legacy BIOS memory, resolving the RSDT/XSDT,
//! FADT, DSDT, FACS, and MADT, extracting enabled processors from the MADT,
//! patching the FADT's power-management register blocks, and linking a new
//! SSDT into the root tables. The [`aml`] module holds the AML recognizer
//! used to find `Processor()` declarations and the forward-only encoder
//! used to build control methods.
//!
//! Nothing here allocates. All physical memory is reached through an
//! [`AcpiHandler`] that maps regions on demand.
//!
//! # Usage
//!
//! ```ignore
//! let tables = AcpiTables::locate(&handler)?;
//! let madt = madt::process_madt(&handler, tables.madt)?;
//! for lapic in &madt.lapics {
//!     // ...
//! }
//! ```

#![no_std]
#![warn(missing_docs)]

pub mod aml;
pub mod arith;
pub mod bytes;
pub mod fadt;
pub mod gas;
pub mod madt;
pub mod rsdp;
pub mod rsdt;
pub mod sdt;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use arith::{div_u64, mul_u64};
pub use fadt::Fadt;
pub use gas::GenericAddress;
pub use madt::{LapicInfo, MadtInfo};
pub use rsdp::Rsdp;
pub use sdt::{SdtHeader, ValidatedTable, checksum, set_checksum, validate_checksum};

/// Errors that can occur during ACPI table parsing and patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcpiError {
    /// The checksum of a table or the RSDP did not validate (sum != 0).
    #[error("table checksum does not sum to zero")]
    InvalidChecksum,
    /// The table signature did not match the expected value.
    #[error("table signature mismatch")]
    InvalidSignature,
    /// A table revision field contained an unusable value.
    #[error("unsupported table revision")]
    InvalidRevision,
    /// A table with the requested signature was not found in the RSDT/XSDT.
    #[error("table not found")]
    TableNotFound,
    /// The RSDP structure was invalid (bad signature or checksum).
    #[error("invalid RSDP")]
    InvalidRsdp,
    /// No search window contained a checksum-valid RSDP.
    #[error("RSDP not found in any BIOS search window")]
    RsdpNotFound,
    /// The RSDP does not point at an RSDT.
    #[error("RSDP carries a null RSDT address")]
    NullRsdt,
    /// A table or structure was too short to contain the expected data.
    #[error("truncated table data")]
    TruncatedData,
    /// The MADT lists more enabled processors than the engine can track.
    #[error("MADT lists more than {limit} enabled processors")]
    TooManyProcessors {
        /// The fixed processor capacity.
        limit: usize,
    },
    /// A relocated or extended table would not fit in 32-bit address space.
    #[error("table address out of range")]
    AddressOutOfRange,
}

/// Trait for mapping physical memory regions so ACPI tables can be read and
/// patched.
///
/// An implementation must return a byte slice covering at least `size` bytes
/// starting at physical address `phys`. Pre-OS firmware usually runs with an
/// identity map, but the crate is agnostic to the strategy.
///
/// # Safety
///
/// Implementors must ensure that the returned slice is valid for the
/// requested `size` bytes and that the mapping remains valid for `'static`.
pub unsafe trait AcpiHandler {
    /// Map a physical memory region and return a byte slice over it.
    ///
    /// # Safety
    ///
    /// The caller guarantees that `phys` is a valid ACPI-related physical
    /// address and `size` does not extend beyond the actual table. The
    /// implementation must return a slice that is valid and readable for
    /// `size` bytes.
    unsafe fn map_physical_region(&self, phys: u64, size: usize) -> &'static [u8];

    /// Map a physical memory region for writing.
    ///
    /// # Safety
    ///
    /// Same contract as [`AcpiHandler::map_physical_region`]. In addition,
    /// the caller must not hold any other mapping overlapping this region
    /// while the returned slice is alive.
    unsafe fn map_physical_region_mut(&self, phys: u64, size: usize) -> &'static mut [u8];
}

/// Physical addresses of the tables a power-management pass touches.
///
/// Populated once by [`AcpiTables::locate`]; only [`AcpiTables::rsdt`] and
/// [`AcpiTables::ssdt`] change afterwards, when a new SSDT is linked in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcpiTables {
    /// Physical address of the RSDP.
    pub rsdp: u64,
    /// Physical address of the RSDT.
    pub rsdt: u64,
    /// Physical address of the XSDT (ACPI 2.0+).
    pub xsdt: Option<u64>,
    /// FADT found through the RSDT.
    pub fadt: u64,
    /// FADT found through the XSDT, if any.
    pub fadt64: Option<u64>,
    /// Physical address of the DSDT.
    pub dsdt: u64,
    /// Physical address of the FACS.
    pub facs: u64,
    /// Physical address of the MADT.
    pub madt: u64,
    /// The SSDT built and linked by this pass, if any.
    pub ssdt: Option<u64>,
}

impl AcpiTables {
    /// Scan legacy BIOS memory for the RSDP and resolve every table hanging
    /// off it.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::RsdpNotFound`] when no RSDP exists, and otherwise
    /// the same errors as [`AcpiTables::from_rsdp`].
    pub fn locate(handler: &impl AcpiHandler) -> Result<Self, AcpiError> {
        let rsdp = rsdp::find_rsdp(handler)?;
        Self::from_rsdp(handler, rsdp)
    }

    /// Resolve every table from an RSDP at a known address.
    ///
    /// The FADT and MADT are required in the RSDT. The XSDT and the FADT it
    /// references are optional. The DSDT must be checksum-valid; the FACS
    /// carries no checksum and is matched by signature alone.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::NullRsdt`] if the RSDP has no RSDT, or the error
    /// from validating the first required table that fails.
    pub fn from_rsdp(handler: &impl AcpiHandler, rsdp_phys: u64) -> Result<Self, AcpiError> {
        let rsdp = Rsdp::parse(handler, rsdp_phys)?;
        if rsdp.rsdt_address == 0 {
            return Err(AcpiError::NullRsdt);
        }
        let rsdt = u64::from(rsdp.rsdt_address);
        sdt::load_table(handler, rsdt, rsdt::RSDT_SIGNATURE)?;

        let xsdt = rsdp.xsdt().filter(|&xsdt| {
            let valid = sdt::load_table(handler, xsdt, rsdt::XSDT_SIGNATURE).is_ok();
            if !valid {
                log::warn!("ignoring invalid XSDT at {xsdt:#x}");
            }
            valid
        });

        let fadt = rsdt::find_valid_table(handler, rsdt, false, fadt::FADT_SIGNATURE)
            .ok_or(AcpiError::TableNotFound)?;
        let fadt64 = xsdt.and_then(|xsdt| rsdt::find_valid_table(handler, xsdt, true, fadt::FADT_SIGNATURE));

        let parsed = Fadt::parse(handler, fadt)?;
        let dsdt = parsed.dsdt_address().ok_or(AcpiError::TableNotFound)?;
        sdt::load_table(handler, dsdt, fadt::DSDT_SIGNATURE)?;

        let facs = parsed.facs_address().ok_or(AcpiError::TableNotFound)?;
        if sdt::read_header(handler, facs)?.signature() != *fadt::FACS_SIGNATURE {
            return Err(AcpiError::InvalidSignature);
        }

        let madt = rsdt::find_valid_table(handler, rsdt, false, madt::MADT_SIGNATURE)
            .ok_or(AcpiError::TableNotFound)?;

        log::debug!("ACPI: RSDP {rsdp_phys:#x} RSDT {rsdt:#x} FADT {fadt:#x} DSDT {dsdt:#x} MADT {madt:#x}");

        Ok(Self {
            rsdp: rsdp_phys,
            rsdt,
            xsdt,
            fadt,
            fadt64,
            dsdt,
            facs,
            madt,
            ssdt: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestMemory;

    const RSDT: u64 = 0x10_0000;
    const XSDT: u64 = 0x10_0400;
    const FADT: u64 = 0x10_1000;
    const DSDT: u64 = 0x10_2000;
    const FACS: u64 = 0x10_3000;
    const MADT: u64 = 0x10_4000;

    fn populated(with_xsdt: bool) -> TestMemory {
        let mem = TestMemory::low_memory();
        mem.put_fadt(FADT, 4, FACS as u32, DSDT as u32);
        mem.put_table(DSDT, b"DSDT", 2, &[0x10, 0x05, b'_', b'P', b'R', b'_']);
        mem.put_facs(FACS);
        mem.put_table(MADT, b"APIC", 3, &[0; 8]);
        mem.put_root(RSDT, false, &[MADT, FADT]);
        if with_xsdt {
            mem.put_root(XSDT, true, &[FADT, MADT]);
        }
        mem.put_rsdp(0xF_0000, 2, RSDT as u32, with_xsdt.then_some(XSDT));
        mem
    }

    #[test]
    fn locate_resolves_every_table() {
        let mem = populated(true);
        let tables = AcpiTables::locate(&mem).unwrap();
        assert_eq!(tables.rsdp, 0xF_0000);
        assert_eq!(tables.rsdt, RSDT);
        assert_eq!(tables.xsdt, Some(XSDT));
        assert_eq!(tables.fadt, FADT);
        assert_eq!(tables.fadt64, Some(FADT));
        assert_eq!(tables.dsdt, DSDT);
        assert_eq!(tables.facs, FACS);
        assert_eq!(tables.madt, MADT);
        assert_eq!(tables.ssdt, None);
    }

    #[test]
    fn xsdt_is_optional() {
        let tables = AcpiTables::locate(&populated(false)).unwrap();
        assert_eq!(tables.xsdt, None);
        assert_eq!(tables.fadt64, None);
    }

    #[test]
    fn corrupt_dsdt_fails_the_locate() {
        let mem = populated(false);
        mem.write_u8(DSDT + 40, 0x11);
        assert_eq!(AcpiTables::locate(&mem), Err(AcpiError::InvalidChecksum));
    }

    #[test]
    fn missing_madt_fails_the_locate() {
        let mem = populated(false);
        mem.put_root(RSDT, false, &[FADT]);
        assert_eq!(AcpiTables::locate(&mem), Err(AcpiError::TableNotFound));
    }

    #[test]
    fn null_rsdt_is_rejected() {
        let mem = TestMemory::low_memory();
        mem.put_rsdp(0xE_0000, 0, 0, None);
        assert_eq!(AcpiTables::locate(&mem), Err(AcpiError::NullRsdt));
    }
}
