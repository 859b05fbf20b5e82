//! `pmrc-ppm` --- processor power-management setup for pre-OS firmware.
//!
//! One call to [`ppm_start`] takes a caller's [`Options`] record and a
//! platform capability surface, discovers every processor socket, reduces
//! the requested P-, C- and T-state features to what the silicon supports,
//! publishes the result to the OS as an SSDT linked into the ACPI root
//! tables, moves the FADT PM blocks to the configured PM base, and finally
//! programs the power-management MSRs on every logical processor.
//!
//! The engine never touches hardware directly. Processor access goes
//! through [`Cpu`] and [`Smp`]; physical memory through
//! [`AcpiHandler`](pmrc_acpi::AcpiHandler). Nothing allocates.
//!
//! Callers that cannot name their processors can derive the map from the
//! DSDT with [`CpuMap`], and retire older processor SSDTs afterwards with
//! [`ConflictPass`].
//!
//! # Usage
//!
//! ```ignore
//! let mut options = Options::default();
//! CpuMap::from_dsdt(&handler, dsdt, &mut scanner)?.apply(&mut options);
//! if !ppm_start(&mut options, &mut smp, &handler) {
//!     for code in &options.exit_state.error_codes {
//!         log::warn!("{}", code.name());
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]

pub mod cpu;
pub mod cpumap;
pub mod cstate;
pub mod exit;
pub mod host;
pub mod init;
pub mod msr;
pub mod options;
pub mod platform;
pub mod pstate;
pub mod socket;
pub mod splice;
pub mod ssdt;
pub mod tstate;

#[cfg(test)]
mod testing;

pub use cpumap::{CpuMap, CpuMapError};
pub use exit::{ExitCode, ExitState};
pub use host::PlatformHost;
pub use options::Options;
pub use platform::{Cpu, Smp};
pub use splice::ConflictPass;

use pmrc_acpi::AcpiHandler;

use crate::platform::run_on_all;

/// A stage failed: `stage` names it, `cause` says why.
struct StageFailure {
    stage: ExitCode,
    cause: ExitCode,
}

fn at(stage: ExitCode) -> impl Fn(ExitCode) -> StageFailure {
    move |cause| StageFailure { stage, cause }
}

/// Run the whole power-management setup once.
///
/// Returns `true` on success. Either way `options.exit_state` holds the
/// codes raised, the final feature enablement and, if one was built, where
/// the SSDT ended up. A caller whose interface version is not supported
/// gets `false` and an untouched record.
///
/// With ACPI access denied, only socket discovery, negotiation and MSR
/// programming run.
pub fn ppm_start<S: Smp, H: AcpiHandler>(options: &mut Options, smp: &mut S, handler: &H) -> bool {
    if !options.version_supported() {
        log::error!(
            "interface version {}.{} not supported",
            options.major(),
            options.minor()
        );
        return false;
    }

    let mut host = PlatformHost::new(options, smp.current());
    match run_stages(&mut host, smp, handler) {
        Ok(()) => {
            host.shutdown(ExitCode::Completed, true);
            log::info!("power management setup complete");
            true
        }
        Err(StageFailure { stage, cause }) => {
            if cause != stage {
                host.record(cause);
            }
            log::error!("{} ({})", stage.name(), cause);
            host.shutdown(stage, false);
            false
        }
    }
}

fn run_stages<S: Smp, H: AcpiHandler>(
    host: &mut PlatformHost<'_>,
    smp: &mut S,
    handler: &H,
) -> Result<(), StageFailure> {
    let acpi = host.options.acpi_allowed();
    if acpi {
        host.locate_tables(handler).map_err(at(ExitCode::FindAcpiTables))?;
        host.process_madt(handler).map_err(at(ExitCode::ProcessMadt))?;
    } else {
        log::info!("ACPI access denied, tables left alone");
    }

    host.collect_socket_info(smp).map_err(at(ExitCode::CollectSocketInfo))?;
    host.determine_configuration();
    host.build_pstates();
    host.build_cstates();
    host.build_tstates();

    if acpi {
        host.process_fadt_tables(handler).map_err(at(ExitCode::UpdateFadt))?;
        host.process_madt_info().map_err(at(ExitCode::ProcessMadtInfo))?;
        host.process_ssdt(handler).map_err(at(ExitCode::ProcessSsdt))?;
    }

    let host = &*host;
    run_on_all(smp, &mut |cpu| host.init_logical_cpu(cpu));
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use pmrc_acpi::aml::AmlScanner;
    use pmrc_acpi::aml::opcode::{self, ext};
    use pmrc_acpi::testing::TestMemory;
    use pmrc_acpi::{AcpiTables, rsdt, validate_checksum};

    use super::*;
    use crate::msr;
    use crate::ssdt::placeholder_ssdt;
    use crate::testing::MockSmp;

    const RSDP: u64 = 0xE_0000;
    const RSDT: u64 = 0x10_0000;
    const FADT: u64 = 0x10_2000;
    const MADT: u64 = 0x10_3000;
    const DSDT: u64 = 0x10_4000;
    const FACS: u64 = 0x10_5000;
    const OLD_SSDT: u64 = 0x10_6000;
    const PLACEHOLDER: u64 = 0x10_7000;
    const CALLER_REGION: u64 = 0x18_0000;

    /// APIC ids of `MockSmp::sandy_bridge(2, 2)`, in ACPI id order.
    const APIC_IDS: [u8; 4] = [0x00, 0x01, 0x10, 0x11];

    fn processor(acpi_id: u8) -> [u8; 13] {
        let mut p = [0u8; 13];
        p[..3].copy_from_slice(&[opcode::EXT_OP_PREFIX, ext::PROCESSOR, 11]);
        p[3..7].copy_from_slice(&[b'C', b'P', b'0', b'0' + acpi_id]);
        p[7] = acpi_id;
        p[8..12].copy_from_slice(&0x410u32.to_le_bytes());
        p[12] = 6;
        p
    }

    /// `Scope(\_PR_) { Processor(CPnn, ...) ... }`, one per APIC id.
    fn dsdt_body() -> Vec<u8> {
        let mut body = Vec::new();
        for acpi_id in 0..APIC_IDS.len() as u8 {
            body.extend_from_slice(&processor(acpi_id));
        }
        let mut aml = Vec::from([opcode::SCOPE, u8::try_from(6 + body.len()).unwrap()]);
        aml.extend_from_slice(b"\\_PR_");
        aml.extend(body);
        aml
    }

    fn madt_body() -> Vec<u8> {
        let mut body = Vec::from(0xFEE0_0000u32.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        for (acpi_id, &apic_id) in APIC_IDS.iter().enumerate() {
            body.extend_from_slice(&[0, 8, acpi_id as u8, apic_id, 1, 0, 0, 0]);
        }
        body
    }

    /// An older SSDT declaring `Scope(\_PR_.CP00) { Name(TYPE, Zero) }`.
    fn old_ssdt_body() -> Vec<u8> {
        let mut aml = Vec::from([opcode::SCOPE, 17, b'\\', opcode::DUAL_NAME_PREFIX]);
        aml.extend_from_slice(b"_PR_CP00");
        aml.extend_from_slice(&[opcode::NAME, b'T', b'Y', b'P', b'E', opcode::ZERO]);
        aml
    }

    fn firmware() -> TestMemory {
        let mem = TestMemory::low_memory();
        mem.put_facs(FACS);
        mem.put_table(DSDT, b"DSDT", 2, &dsdt_body());
        mem.put_fadt(FADT, 3, FACS as u32, DSDT as u32);
        mem.put_table(MADT, b"APIC", 3, &madt_body());
        mem.put_table(OLD_SSDT, b"SSDT", 1, &old_ssdt_body());
        mem.put_root(RSDT, false, &[FADT, MADT, OLD_SSDT]);
        mem.put_rsdp(RSDP, 0, RSDT as u32, None);
        mem
    }

    fn options() -> Options {
        Options {
            ssdt_loc_flag: 3,
            ssdt_mem_addr: CALLER_REGION as u32,
            ssdt_mem_size: 0x8000,
            ..Options::default()
        }
    }

    #[test]
    fn full_run_publishes_and_programs() {
        let mem = firmware();
        let mut options = options();
        let mut scanner = AmlScanner::new();
        CpuMap::from_dsdt(&mem, DSDT, &mut scanner)
            .unwrap()
            .apply(&mut options);
        let mut smp = MockSmp::sandy_bridge(2, 2);

        assert!(ppm_start(&mut options, &mut smp, &mem));

        let exit = &options.exit_state;
        assert!(exit.is_clean_success());
        assert!(exit.pstates_enabled && exit.cstates_enabled && exit.tstates_enabled);
        assert_eq!(u64::from(exit.ssdt_mem_addr), CALLER_REGION);
        assert_eq!(exit.ssdt_mem_size, mem.read_u32(CALLER_REGION + 4));
        assert!(validate_checksum(mem.table(CALLER_REGION)));
        assert_eq!(
            rsdt::entries(&mem, RSDT, false).collect::<Vec<_>>(),
            [FADT, MADT, OLD_SSDT, CALLER_REGION]
        );

        // PM1a event block.
        assert_eq!(mem.read_u32(FADT + 56), 0x400);
        assert!(validate_checksum(mem.table(FADT)));

        for &apic_id in &APIC_IDS {
            let cpu = smp.cpu(u32::from(apic_id));
            assert_eq!(cpu.msr(msr::IA32_PERF_CTL), Some(35 << 8));
            assert_eq!(cpu.msr(msr::PMG_IO_CAPTURE_BASE), Some((2 << 16) | 0x414));
        }
        assert_eq!(smp.rounds, 2);

        // The older SSDT names CP00 and gives way to the placeholder.
        let mut buf = [0u8; 64];
        let len = placeholder_ssdt(&mut buf).unwrap();
        mem.write_bytes(PLACEHOLDER, &buf[..len]);
        let tables = AcpiTables::locate(&mem).unwrap();
        ConflictPass {
            new_ssdt: CALLER_REGION,
            placeholder: PLACEHOLDER,
            inserted: true,
        }
        .resolve(&mem, &tables, &mut scanner)
        .unwrap();
        assert_eq!(
            rsdt::entries(&mem, RSDT, false).collect::<Vec<_>>(),
            [FADT, MADT, PLACEHOLDER, CALLER_REGION]
        );
        assert!(validate_checksum(mem.table(RSDT)));
    }

    #[test]
    fn missing_tables_fail_before_any_broadcast() {
        let mem = TestMemory::low_memory();
        let mut options = options();
        let mut smp = MockSmp::sandy_bridge(1, 2);

        assert!(!ppm_start(&mut options, &mut smp, &mem));

        let exit = &options.exit_state;
        assert!(!exit.return_status);
        assert_eq!(exit.error_codes.as_slice(), [ExitCode::FindAcpiTables]);
        assert_eq!(exit.ssdt_mem_addr, 0);
        assert_eq!(smp.rounds, 0);
    }

    #[test]
    fn ssdt_failures_record_cause_then_stage() {
        let mem = firmware();
        let mut options = Options {
            ssdt_loc_flag: 7,
            ..options()
        };
        CpuMap::from_dsdt(&mem, DSDT, &mut AmlScanner::new())
            .unwrap()
            .apply(&mut options);
        let mut smp = MockSmp::sandy_bridge(2, 2);

        assert!(!ppm_start(&mut options, &mut smp, &mem));

        assert_eq!(
            options.exit_state.error_codes.as_slice(),
            [
                ExitCode::InvalidSsdtLocationFlag,
                ExitCode::BuildSsdt,
                ExitCode::ProcessSsdt
            ]
        );
        // Sockets were probed, but no processor was programmed.
        assert_eq!(smp.rounds, 1);
        assert!(smp.cpu(0).writes().is_empty());
    }

    #[test]
    fn caller_region_one_byte_short_fails_cleanly() {
        let mapped = |size| {
            let mem = firmware();
            let mut options = Options {
                ssdt_mem_size: size,
                ..options()
            };
            CpuMap::from_dsdt(&mem, DSDT, &mut AmlScanner::new())
                .unwrap()
                .apply(&mut options);
            (mem, options)
        };

        let (fitted_mem, mut fitted) = mapped(0x8000);
        assert!(ppm_start(&mut fitted, &mut MockSmp::sandy_bridge(2, 2), &fitted_mem));
        let len = fitted.exit_state.ssdt_mem_size;

        let (mem, mut options) = mapped(len - 1);
        let guard = CALLER_REGION + u64::from(len) - 1;
        mem.write_bytes(guard, &[0xA5; 8]);
        assert!(!ppm_start(&mut options, &mut MockSmp::sandy_bridge(2, 2), &mem));

        let exit = &options.exit_state;
        assert_eq!(
            exit.error_codes.as_slice(),
            [
                ExitCode::SsdtSizeExceeded,
                ExitCode::BuildSsdt,
                ExitCode::ProcessSsdt
            ]
        );
        assert_eq!(mem.bytes(guard, 8), [0xA5; 8]);
        assert_eq!((exit.ssdt_mem_addr, exit.ssdt_mem_size), (0, 0));
        assert_eq!(
            (exit.pstates_enabled, exit.turbo_enabled, exit.cstates_enabled, exit.tstates_enabled),
            (
                fitted.exit_state.pstates_enabled,
                fitted.exit_state.turbo_enabled,
                fitted.exit_state.cstates_enabled,
                fitted.exit_state.tstates_enabled
            )
        );
        assert_eq!(
            rsdt::entries(&mem, RSDT, false).collect::<Vec<_>>(),
            [FADT, MADT, OLD_SSDT]
        );
    }

    #[test]
    fn denied_acpi_access_still_programs_processors() {
        let mem = TestMemory::low_memory();
        let mut options = Options {
            acpi_access: false,
            ..Options::default()
        };
        let mut smp = MockSmp::sandy_bridge(1, 2);

        assert!(ppm_start(&mut options, &mut smp, &mem));

        assert!(options.exit_state.is_clean_success());
        assert_eq!(options.exit_state.ssdt_mem_addr, 0);
        assert_eq!(smp.cpu(1).msr(msr::IA32_PERF_CTL), Some(35 << 8));
    }

    #[test]
    fn unsupported_version_is_refused_untouched() {
        let mem = TestMemory::low_memory();
        let mut options = Options {
            interface_version: 0x000B_0000 - 1,
            ..Options::default()
        };
        let mut smp = MockSmp::sandy_bridge(1, 1);

        assert!(!ppm_start(&mut options, &mut smp, &mem));

        assert!(options.exit_state.error_codes.is_empty());
        assert_eq!(smp.rounds, 0);
    }
}
