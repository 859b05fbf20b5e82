//! Multiple APIC Description Table (MADT) parsing.
//!
//! The MADT describes the interrupt controller topology of the system. Only
//! the processor records matter here: legacy Local APIC entries (type 0) and
//! x2APIC entries (type 9). Everything else is skipped by its length.

use arrayvec::ArrayVec;
use bitflags::bitflags;

use crate::bytes::{read_u8, read_u32};
use crate::sdt::SdtHeader;
use crate::{AcpiError, AcpiHandler};

/// MADT table signature (`b"APIC"`).
pub const MADT_SIGNATURE: &[u8; 4] = b"APIC";

/// Maximum number of enabled logical processors tracked.
pub const MAX_LOGICAL_CPU: usize = 256;

/// Entry type: Processor Local APIC.
const ENTRY_LOCAL_APIC: u8 = 0;
/// Entry type: Processor Local x2APIC.
const ENTRY_X2APIC: u8 = 9;

const LOCAL_APIC_LEN: usize = 8;
const X2APIC_LEN: usize = 16;

bitflags! {
    /// Local APIC / x2APIC entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LapicFlags: u32 {
        /// The processor is usable.
        const ENABLED = 1 << 0;
        /// The processor can be brought online later.
        const ONLINE_CAPABLE = 1 << 1;
    }
}

/// Which MADT entry form described a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapicKind {
    /// Type 0: 8-bit APIC id, 8-bit ACPI processor id.
    LocalApic,
    /// Type 9: 32-bit x2APIC id, 32-bit ACPI processor UID.
    X2Apic,
}

/// One enabled logical processor from the MADT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapicInfo {
    /// Entry form.
    pub kind: LapicKind,
    /// APIC or x2APIC id.
    pub apic_id: u32,
    /// ACPI processor id (type 0) or processor UID (type 9).
    pub acpi_id: u32,
}

/// The enabled processors listed by the MADT, in table order.
#[derive(Debug, Clone, Default)]
pub struct MadtInfo {
    /// Physical address of the local APIC.
    pub local_apic_address: u32,
    /// Enabled processor records.
    pub lapics: ArrayVec<LapicInfo, MAX_LOGICAL_CPU>,
}

impl MadtInfo {
    /// Size of the fixed MADT fields after the SDT header (address + flags).
    const FIELDS_SIZE: usize = 8;

    /// Walk a complete MADT (header included).
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::TruncatedData`] if a record is shorter than its
    /// type requires, declares length zero, or runs past the table, and
    /// [`AcpiError::TooManyProcessors`] if more than [`MAX_LOGICAL_CPU`]
    /// processors are enabled.
    pub fn parse(table: &[u8]) -> Result<Self, AcpiError> {
        let entries_offset = SdtHeader::SIZE + Self::FIELDS_SIZE;
        let mut info = Self {
            local_apic_address: read_u32(table, SdtHeader::SIZE).ok_or(AcpiError::TruncatedData)?,
            lapics: ArrayVec::new(),
        };

        let mut cursor = entries_offset;
        while cursor < table.len() {
            let kind = read_u8(table, cursor).ok_or(AcpiError::TruncatedData)?;
            let len = read_u8(table, cursor + 1).ok_or(AcpiError::TruncatedData)? as usize;
            if len < 2 || cursor + len > table.len() {
                return Err(AcpiError::TruncatedData);
            }
            let entry = &table[cursor..cursor + len];

            let lapic = match kind {
                ENTRY_LOCAL_APIC => Some(parse_local_apic(entry)?),
                ENTRY_X2APIC => Some(parse_x2apic(entry)?),
                _ => None,
            };
            match lapic {
                Some((flags, lapic)) if flags.contains(LapicFlags::ENABLED) => info
                    .lapics
                    .try_push(lapic)
                    .map_err(|_| AcpiError::TooManyProcessors { limit: MAX_LOGICAL_CPU })?,
                _ => {}
            }

            cursor += len;
        }

        Ok(info)
    }
}

fn parse_local_apic(entry: &[u8]) -> Result<(LapicFlags, LapicInfo), AcpiError> {
    if entry.len() < LOCAL_APIC_LEN {
        return Err(AcpiError::TruncatedData);
    }
    let flags = LapicFlags::from_bits_retain(read_u32(entry, 4).ok_or(AcpiError::TruncatedData)?);
    Ok((
        flags,
        LapicInfo {
            kind: LapicKind::LocalApic,
            acpi_id: u32::from(entry[2]),
            apic_id: u32::from(entry[3]),
        },
    ))
}

fn parse_x2apic(entry: &[u8]) -> Result<(LapicFlags, LapicInfo), AcpiError> {
    if entry.len() < X2APIC_LEN {
        return Err(AcpiError::TruncatedData);
    }
    let field = |offset| read_u32(entry, offset).ok_or(AcpiError::TruncatedData);
    Ok((
        LapicFlags::from_bits_retain(field(8)?),
        LapicInfo {
            kind: LapicKind::X2Apic,
            apic_id: field(4)?,
            acpi_id: field(12)?,
        },
    ))
}

/// Load the MADT at `phys` and collect its enabled processors.
///
/// # Errors
///
/// Returns an error if the table fails signature or checksum validation, or
/// any error from [`MadtInfo::parse`].
pub fn process_madt(handler: &impl AcpiHandler, phys: u64) -> Result<MadtInfo, AcpiError> {
    let table = crate::sdt::load_table(handler, phys, MADT_SIGNATURE)?;
    let info = MadtInfo::parse(table.data)?;
    log::debug!("MADT: {} enabled processors", info.lapics.len());
    Ok(info)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use crate::testing::TestMemory;

    fn local_apic(acpi_id: u8, apic_id: u8, enabled: bool) -> [u8; 8] {
        [0, 8, acpi_id, apic_id, u8::from(enabled), 0, 0, 0]
    }

    fn x2apic(x2apic_id: u32, uid: u32, enabled: bool) -> [u8; 16] {
        let mut e = [0u8; 16];
        e[0] = 9;
        e[1] = 16;
        e[4..8].copy_from_slice(&x2apic_id.to_le_bytes());
        e[8..12].copy_from_slice(&u32::from(enabled).to_le_bytes());
        e[12..16].copy_from_slice(&uid.to_le_bytes());
        e
    }

    fn madt_body(entries: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::from(0xFEE0_0000u32.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        for e in entries {
            body.extend_from_slice(e);
        }
        body
    }

    #[test]
    fn collects_enabled_processors_of_both_forms() {
        let ioapic = [1u8, 12, 0, 0, 0, 0, 0xC0, 0xFE, 0, 0, 0, 0];
        let mem = TestMemory::low_memory();
        mem.put_table(
            0x10_0000,
            b"APIC",
            3,
            &madt_body(&[
                &local_apic(0, 0, true),
                &ioapic,
                &local_apic(1, 2, false),
                &x2apic(0x100, 7, true),
            ]),
        );

        let info = process_madt(&mem, 0x10_0000).unwrap();
        assert_eq!(info.local_apic_address, 0xFEE0_0000);
        assert_eq!(
            info.lapics.as_slice(),
            [
                LapicInfo { kind: LapicKind::LocalApic, apic_id: 0, acpi_id: 0 },
                LapicInfo { kind: LapicKind::X2Apic, apic_id: 0x100, acpi_id: 7 },
            ]
        );
    }

    #[test]
    fn exceeding_the_cap_fails_instead_of_truncating() {
        let entries: Vec<[u8; 8]> = (0..=MAX_LOGICAL_CPU)
            .map(|i| local_apic(i as u8, i as u8, true))
            .collect();
        let refs: Vec<&[u8]> = entries.iter().map(|e| &e[..]).collect();
        let mut table = Vec::from([0u8; SdtHeader::SIZE]);
        table.extend_from_slice(&madt_body(&refs));

        assert_eq!(
            MadtInfo::parse(&table).map(|i| i.lapics.len()),
            Err(AcpiError::TooManyProcessors { limit: MAX_LOGICAL_CPU })
        );

        let mut exact = Vec::from([0u8; SdtHeader::SIZE]);
        exact.extend_from_slice(&madt_body(&refs[..MAX_LOGICAL_CPU]));
        assert_eq!(MadtInfo::parse(&exact).map(|i| i.lapics.len()), Ok(MAX_LOGICAL_CPU));
    }

    #[test]
    fn records_never_cross_the_table_end() {
        let mut table = Vec::from([0u8; SdtHeader::SIZE]);
        table.extend_from_slice(&madt_body(&[&local_apic(0, 0, true)]));
        // A trailing x2APIC record cut short by the table length.
        table.extend_from_slice(&x2apic(1, 1, true)[..10]);
        assert_eq!(MadtInfo::parse(&table).map(|_| ()), Err(AcpiError::TruncatedData));

        let mut zero_len = Vec::from([0u8; SdtHeader::SIZE]);
        zero_len.extend_from_slice(&madt_body(&[&[5, 0, 0, 0]]));
        assert_eq!(MadtInfo::parse(&zero_len).map(|_| ()), Err(AcpiError::TruncatedData));
    }
}
