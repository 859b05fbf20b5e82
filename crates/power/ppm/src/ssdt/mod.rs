//! SSDT assembly.
//!
//! One `Scope` per MADT processor, each holding the negotiation state
//! variables, `_PDC`/`_OSC`, and the performance, idle and throttling
//! objects for whichever features survived negotiation.

pub mod methods;

use arrayvec::ArrayVec;
use pmrc_acpi::SdtHeader;
use pmrc_acpi::aml::{AmlError, AmlWriter, NameSeg, TableStart};

use crate::exit::ExitCode;
use crate::host::{LapicRecord, PlatformHost};
use crate::options::MAX_SUPPORTED_CPU_NAMESEGS;

/// Signature of the generated table.
pub const SSDT_SIGNATURE: [u8; 4] = *b"SSDT";

/// OEM table id of the generated SSDT.
pub const PPM_TABLE_ID: [u8; 8] = *b"PPM RCM ";

/// OEM table id of the placeholder written over conflicting SSDTs.
pub const PLACEHOLDER_TABLE_ID: [u8; 8] = *b"OVERRIDE";

/// Buffer size used when the SSDT is built in local memory.
pub const SSDT_BUFFER_SIZE: usize = 20 * 1024;

fn header(oem_table_id: [u8; 8]) -> SdtHeader {
    SdtHeader {
        signature: SSDT_SIGNATURE,
        length: 0,
        revision: 1,
        checksum: 0,
        oem_id: *b"INTEL ",
        oem_table_id,
        oem_revision: 0x8000_0001,
        creator_id: *b"INTL",
        creator_revision: 0x2006_1109,
    }
}

/// Assemble the SSDT for every resolved processor of `host` into `buf`.
///
/// Returns the table length.
///
/// # Errors
///
/// - [`ExitCode::InvalidSsdtLen`] if `buf` is empty.
/// - [`ExitCode::SsdtSizeExceeded`] if the table does not fit `buf`.
pub fn build_ssdt(host: &PlatformHost<'_>, buf: &mut [u8]) -> Result<usize, ExitCode> {
    if buf.is_empty() {
        return Err(ExitCode::InvalidSsdtLen);
    }
    let mut w = AmlWriter::new(buf);
    let len = write_ssdt(host, &mut w)
        .and_then(|start| w.finish_table(start).map(<[u8]>::len))
        .map_err(|err| {
            log::error!("SSDT: {err}");
            ExitCode::SsdtSizeExceeded
        })?;
    log::debug!("SSDT: {} processor scope(s), {len} bytes", host.lapics.len());
    Ok(len)
}

fn write_ssdt(host: &PlatformHost<'_>, w: &mut AmlWriter<'_>) -> Result<TableStart, AmlError> {
    let start = w.table_header(&header(PPM_TABLE_ID))?;
    let root = host.options.cpu_namespace().name_seg();
    for record in &host.lapics {
        processor_scope(host, root, record, w)?;
    }
    Ok(start)
}

fn processor_scope(
    host: &PlatformHost<'_>,
    root: NameSeg,
    record: &LapicRecord,
    w: &mut AmlWriter<'_>,
) -> Result<(), AmlError> {
    let mut path: ArrayVec<NameSeg, { MAX_SUPPORTED_CPU_NAMESEGS + 1 }> = ArrayVec::new();
    path.push(root);
    path.extend(record.namepath.segments().iter().copied());

    let socket = &host.sockets[record.pkg_index];
    let cpu = &socket.cpu;
    let options = &*host.options;

    let scope = w.scope(true, &path)?;
    methods::state_variables(
        w,
        host.pstates_enabled,
        host.cstates_enabled,
        options.mwait_enabled,
        host.tstates_enabled,
    )?;
    methods::pdc(w)?;
    methods::osc(w)?;

    if host.pstates_enabled {
        methods::pss(w, host.family, &cpu.pstates)?;
        methods::pct(w)?;
        methods::ppc(w)?;
        methods::psd(
            w,
            record.pkg_index as u32,
            host.pstate_coordination,
            socket.logical_cpus,
        )?;
    }

    if host.cstates_enabled {
        methods::cst(w, &cpu.mwait_cstates, &cpu.io_cstates)?;
        #[cfg(feature = "csd")]
        methods::csd(
            w,
            record.core_apic_id,
            socket.threads_in_core(record.core_index),
            &cpu.io_cstates,
        )?;
    }

    if host.tstates_enabled {
        methods::tpc(w)?;
        methods::ptc(w)?;
        methods::tss(w, &cpu.tstates)?;
        methods::tsd(w, record.core_apic_id, socket.threads_in_core(record.core_index))?;
    }

    w.finish(scope)
}

/// Write the empty SSDT that replaces conflicting processor SSDTs.
///
/// Returns the table length.
///
/// # Errors
///
/// [`ExitCode::SsdtSizeExceeded`] if `buf` cannot hold a header.
pub fn placeholder_ssdt(buf: &mut [u8]) -> Result<usize, ExitCode> {
    let mut w = AmlWriter::new(buf);
    w.table_header(&header(PLACEHOLDER_TABLE_ID))
        .and_then(|start| w.finish_table(start).map(<[u8]>::len))
        .map_err(|_| ExitCode::SsdtSizeExceeded)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use pmrc_acpi::aml::AmlScanner;
    use pmrc_acpi::validate_checksum;

    use super::*;
    use crate::options::Options;
    use crate::testing::{MockSmp, prepared_host};

    fn scopes(table: &[u8]) -> usize {
        table[SdtHeader::SIZE..]
            .windows(6)
            .filter(|w| w[0] == pmrc_acpi::aml::opcode::SCOPE && w[3] == b'\\' && &w[4..6] == b"\x2E_")
            .count()
    }

    #[test]
    fn one_scope_per_processor() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(2, 2);
        let host = prepared_host(&mut options, &mut smp);
        let mut buf = [0u8; SSDT_BUFFER_SIZE];
        let len = build_ssdt(&host, &mut buf).unwrap();
        let table = &buf[..len];

        let header = SdtHeader::read_from_bytes(table).unwrap();
        assert_eq!(header.signature, SSDT_SIGNATURE);
        assert_eq!(header.length as usize, len);
        assert_eq!(header.oem_table_id, PPM_TABLE_ID);
        assert_eq!(header.creator_revision, 0x2006_1109);
        assert!(validate_checksum(table));
        assert_eq!(scopes(table), 4);
    }

    #[test]
    fn generated_body_walks_cleanly() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(1, 2);
        let host = prepared_host(&mut options, &mut smp);
        let mut buf = [0u8; SSDT_BUFFER_SIZE];
        let len = build_ssdt(&host, &mut buf).unwrap();

        let mut scanner = AmlScanner::new();
        assert_eq!(scanner.walk(&buf[SdtHeader::SIZE..len]), Ok(()));
        assert!(buf[..len].windows(4).any(|w| w == b"_TSD"));
        assert!(buf[..len].windows(4).any(|w| w == b"_PSS"));
    }

    #[test]
    fn disabled_features_are_omitted() {
        let mut options = Options {
            pstates_enabled: false,
            tstates_enabled: false,
            ..Options::default()
        };
        let mut smp = MockSmp::sandy_bridge(1, 1);
        let host = prepared_host(&mut options, &mut smp);
        let mut buf = [0u8; SSDT_BUFFER_SIZE];
        let len = build_ssdt(&host, &mut buf).unwrap();
        let body = &buf[..len];
        assert!(!body.windows(4).any(|w| w == b"_PSS"));
        assert!(!body.windows(4).any(|w| w == b"_TSS"));
        assert!(body.windows(4).any(|w| w == b"_CST"));
    }

    #[test]
    fn sb_namespace_roots_the_scopes() {
        let mut options = Options {
            cpu_namespace_flag: 1,
            ..Options::default()
        };
        let mut smp = MockSmp::sandy_bridge(1, 1);
        let host = prepared_host(&mut options, &mut smp);
        let mut buf = [0u8; SSDT_BUFFER_SIZE];
        let len = build_ssdt(&host, &mut buf).unwrap();
        assert!(buf[..len].windows(10).any(|w| w == b"\\\x2E_SB_CP00"));
    }

    #[test]
    fn size_failures() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(1, 1);
        let host = prepared_host(&mut options, &mut smp);
        assert_eq!(build_ssdt(&host, &mut []), Err(ExitCode::InvalidSsdtLen));
        assert_eq!(build_ssdt(&host, &mut [0u8; 128]), Err(ExitCode::SsdtSizeExceeded));
    }

    /// `Name(<name>, <value>)` as a DWORD.
    fn named_dword(name: &[u8; 4], value: u32) -> std::vec::Vec<u8> {
        let mut bytes = std::vec![pmrc_acpi::aml::opcode::NAME];
        bytes.extend_from_slice(name);
        bytes.push(pmrc_acpi::aml::opcode::DWORD_PREFIX);
        bytes.extend_from_slice(&value.to_le_bytes());
        bytes
    }

    #[test]
    fn state_variables_follow_negotiation() {
        let regs = |eax, ebx, ecx, edx| crate::platform::CpuidRegs { eax, ebx, ecx, edx };
        let mut options = Options::default();
        // No ACPI thermal monitor and clock control.
        let mut smp = MockSmp::sandy_bridge(1, 1).map_cpus(|cpu| {
            cpu.with_cpuid(crate::cpu::LEAF_FEATURES, 0, regs(0x206A7, 0, (1 << 7) | (1 << 3), 0))
        });
        let host = prepared_host(&mut options, &mut smp);
        assert!(host.options.tstates_enabled);
        assert!(!host.tstates_enabled);

        let mut buf = [0u8; SSDT_BUFFER_SIZE];
        let len = build_ssdt(&host, &mut buf).unwrap();
        let table = &buf[..len];
        let has = |needle: &[u8]| table.windows(needle.len()).any(|w| w == needle);
        assert!(has(&named_dword(b"TSEN", 0)));
        assert!(has(&named_dword(b"PSEN", 1)));
        assert!(has(&named_dword(b"CSEN", 1)));
        assert!(!has(b"_TSS"));
    }

    #[test]
    fn one_byte_short_buffer_is_left_within_bounds() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(2, 2);
        let host = prepared_host(&mut options, &mut smp);
        let mut fitted = [0u8; SSDT_BUFFER_SIZE];
        let len = build_ssdt(&host, &mut fitted).unwrap();

        let mut buf = [0xA5u8; SSDT_BUFFER_SIZE];
        let (short, guard) = buf.split_at_mut(len - 1);
        assert_eq!(build_ssdt(&host, short), Err(ExitCode::SsdtSizeExceeded));
        assert!(guard.iter().all(|&b| b == 0xA5));
        assert_eq!(build_ssdt(&host, &mut buf[..len]), Ok(len));
    }

    #[test]
    fn placeholder_is_an_empty_table() {
        let mut buf = [0u8; 64];
        let len = placeholder_ssdt(&mut buf).unwrap();
        assert_eq!(len, SdtHeader::SIZE);
        let header = SdtHeader::read_from_bytes(&buf).unwrap();
        assert_eq!(header.oem_table_id, PLACEHOLDER_TABLE_ID);
        assert!(validate_checksum(&buf[..len]));
    }
}
