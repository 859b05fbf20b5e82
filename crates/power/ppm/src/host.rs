//! The run context and the orchestration stages that fill it in.
//!
//! A [`PlatformHost`] lives for one [`ppm_start`](crate::ppm_start) call.
//! Each stage method reads what earlier stages produced and returns the
//! [`ExitCode`] that explains its own failure; the orchestrator decides what
//! gets recorded.

use arrayvec::ArrayVec;
use pmrc_acpi::madt::{self, LapicInfo, MAX_LOGICAL_CPU, MadtInfo};
use pmrc_acpi::{AcpiHandler, AcpiTables, fadt};

use crate::cpu::CpuFamily;
use crate::cstate::{CstatePolicy, build_cstates};
use crate::exit::{ExitCode, SmpExitState};
use crate::options::{CpuMapEntry, Options, PerformancePerWatt, PstateCoordination};
use crate::platform::{Cpu, Smp, run_on_all};
use crate::pstate::{build_pstates, compute_tdp};
use crate::socket::{self, CpuFeatures, MAX_CORES, MAX_CPU_SOCKETS, SocketInfo};
use crate::tstate::build_tstates;

/// Marks a live host. Broadcast callbacks only record into a host that
/// carries it.
pub const HOST_SIGNATURE: [u8; 4] = *b"HOST";

/// An enabled MADT processor resolved against the discovered sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapicRecord {
    /// The MADT entry.
    pub info: LapicInfo,
    /// Index into [`PlatformHost::sockets`].
    pub pkg_index: usize,
    /// Core index within the socket.
    pub core_index: u32,
    /// APIC id with the thread bits cleared.
    pub core_apic_id: u32,
    /// The processor's ACPI name.
    pub namepath: CpuMapEntry,
}

/// Everything one run knows.
#[derive(Debug)]
pub struct PlatformHost<'o> {
    signature: [u8; 4],
    /// Family of the bootstrap processor.
    pub family: CpuFamily,
    /// The caller's options; the exit record is written here.
    pub options: &'o mut Options,
    /// Located ACPI tables.
    pub tables: AcpiTables,
    /// Enabled processors from the MADT.
    pub madt: MadtInfo,
    /// MADT processors resolved to sockets and names.
    pub lapics: ArrayVec<LapicRecord, MAX_LOGICAL_CPU>,
    /// Discovered sockets, in discovery order.
    pub sockets: ArrayVec<SocketInfo, MAX_CPU_SOCKETS>,
    /// Negotiated P-state enablement.
    pub pstates_enabled: bool,
    /// Negotiated Turbo enablement.
    pub turbo_enabled: bool,
    /// Negotiated C-state enablement.
    pub cstates_enabled: bool,
    /// Negotiated T-state enablement.
    pub tstates_enabled: bool,
    /// Validated `_PSD` coordination type.
    pub pstate_coordination: PstateCoordination,
    /// Energy-performance bias policy after negotiation.
    pub perf_per_watt: PerformancePerWatt,
    /// Codes raised inside broadcast callbacks.
    pub smp_exit: SmpExitState,
}

impl<'o> PlatformHost<'o> {
    /// Start a run: clear the caller's exit record and identify the
    /// bootstrap processor.
    pub fn new(options: &'o mut Options, bsp: &impl Cpu) -> Self {
        options.exit_state.error_codes.clear();
        options.exit_state.ssdt_mem_addr = 0;
        options.exit_state.ssdt_mem_size = 0;

        let family = CpuFamily::detect(bsp);
        if family == CpuFamily::Unknown {
            log::warn!("unrecognized processor, using legacy programming");
            options.exit_state.record(ExitCode::UnsupportedProcessor);
        }

        Self {
            signature: HOST_SIGNATURE,
            family,
            options,
            tables: AcpiTables::default(),
            madt: MadtInfo::default(),
            lapics: ArrayVec::new(),
            sockets: ArrayVec::new(),
            pstates_enabled: false,
            turbo_enabled: false,
            cstates_enabled: false,
            tstates_enabled: false,
            pstate_coordination: PstateCoordination::HwAll,
            perf_per_watt: PerformancePerWatt::Traditional,
            smp_exit: SmpExitState::default(),
        }
    }

    /// Whether this host is still accepting broadcast results.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.signature == HOST_SIGNATURE
    }

    /// Append `code` to the caller's exit record.
    pub fn record(&mut self, code: ExitCode) {
        self.options.exit_state.record(code);
    }

    /// Append `code` to the broadcast diagnostic list, if the host is live.
    pub fn record_smp(&mut self, code: ExitCode) {
        if !self.is_live() {
            return;
        }
        self.smp_exit.record(code);
    }

    /// Record the terminal `code` and publish the final state to the
    /// caller. The host stops accepting broadcast results.
    pub fn shutdown(&mut self, code: ExitCode, success: bool) {
        self.record(code);
        let exit = &mut self.options.exit_state;
        exit.return_status = success;
        exit.pstates_enabled = self.pstates_enabled;
        exit.turbo_enabled = self.turbo_enabled;
        exit.cstates_enabled = self.cstates_enabled;
        exit.tstates_enabled = self.tstates_enabled;
        self.signature = [0; 4];
    }

    // ─── ACPI discovery ────────────────────────────────────────────────────

    /// Find the RSDP and every table hanging off it.
    ///
    /// # Errors
    ///
    /// [`ExitCode::FindAcpiTables`] if any required table is missing or
    /// corrupt.
    pub fn locate_tables(&mut self, handler: &impl AcpiHandler) -> Result<(), ExitCode> {
        self.tables = AcpiTables::locate(handler).map_err(|err| {
            log::error!("ACPI tables: {err}");
            ExitCode::FindAcpiTables
        })?;
        Ok(())
    }

    /// Read the enabled processors from the MADT.
    ///
    /// # Errors
    ///
    /// [`ExitCode::ProcessMadt`] if the MADT is corrupt or lists more
    /// processors than can be tracked.
    pub fn process_madt(&mut self, handler: &impl AcpiHandler) -> Result<(), ExitCode> {
        self.madt = madt::process_madt(handler, self.tables.madt).map_err(|err| {
            log::error!("MADT: {err}");
            ExitCode::ProcessMadt
        })?;
        Ok(())
    }

    // ─── Socket discovery ──────────────────────────────────────────────────

    /// Probe one processor per socket.
    ///
    /// # Errors
    ///
    /// [`ExitCode::CollectSocketInfo`] if any callback reported a failure.
    pub fn collect_socket_info<S: Smp>(&mut self, smp: &mut S) -> Result<(), ExitCode> {
        run_on_all(smp, &mut |cpu| self.find_socket_proxy(cpu));
        if self.smp_exit.is_empty() {
            log::debug!("{} socket(s) discovered", self.sockets.len());
            Ok(())
        } else {
            Err(ExitCode::CollectSocketInfo)
        }
    }

    /// Broadcast callback: claim the calling processor's socket if no other
    /// processor has.
    pub fn find_socket_proxy(&mut self, cpu: &impl Cpu) {
        if !self.is_live() {
            return;
        }
        let socket_id = socket::current_socket_id(cpu);
        if self.sockets.iter().any(|s| s.socket_id == socket_id) {
            return;
        }
        if self.sockets.is_full() {
            log::warn!("socket {socket_id} exceeds the {MAX_CPU_SOCKETS}-socket limit");
            self.record_smp(ExitCode::SocketProxySave);
            return;
        }
        self.sockets.push(SocketInfo {
            socket_id,
            cpu: socket::collect_cpu_info(cpu, self.family),
            ..SocketInfo::default()
        });
    }

    // ─── Negotiation ───────────────────────────────────────────────────────

    /// Reduce the requested features to what every socket supports.
    pub fn determine_configuration(&mut self) {
        let options = &*self.options;
        self.pstates_enabled = options.pstates_enabled;
        self.turbo_enabled = options.turbo_enabled;
        self.cstates_enabled = options.cstates_enabled;
        self.tstates_enabled = options.tstates_enabled;
        self.pstate_coordination = PstateCoordination::from(options.pstate_coordination);
        self.perf_per_watt = options.perf_per_watt();

        for socket in &self.sockets {
            let features = socket.cpu.features;
            self.pstates_enabled &= features.contains(CpuFeatures::EIST);
            self.turbo_enabled &= features.turbo_available();
            self.tstates_enabled &= features.contains(CpuFeatures::ACPI_THROTTLING);
            if !features.contains(CpuFeatures::ENERGY_PERF_BIAS) {
                self.perf_per_watt = PerformancePerWatt::Traditional;
            }
        }
        log::debug!(
            "negotiated: pstates {} turbo {} cstates {} tstates {}",
            self.pstates_enabled,
            self.turbo_enabled,
            self.cstates_enabled,
            self.tstates_enabled,
        );
    }

    // ─── State tables ──────────────────────────────────────────────────────

    /// Build every socket's P-state table. A socket whose ratio range yields
    /// fewer than two states disables P-states for the platform.
    pub fn build_pstates(&mut self) {
        let (family, turbo) = (self.family, self.turbo_enabled);
        for socket in &mut self.sockets {
            socket.cpu.pstates = build_pstates(&socket.cpu, family, turbo);
            if socket.cpu.pstates.is_empty() {
                log::warn!("socket {}: ratio range too narrow, P-states disabled", socket.socket_id);
                self.pstates_enabled = false;
                break;
            }
        }
    }

    /// Build every socket's MWAIT and I/O C-state tables.
    pub fn build_cstates(&mut self) {
        let options = &*self.options;
        let policy = CstatePolicy {
            c3: options.c3_policy(),
            c6: options.c6_enabled,
            c7: options.c7_enabled,
            pmbase: options.pmbase,
        };
        for socket in &mut self.sockets {
            let (mwait, io) = build_cstates(&socket.cpu, &policy);
            socket.cpu.mwait_cstates = mwait;
            socket.cpu.io_cstates = io;
        }
    }

    /// Build every socket's T-state table.
    pub fn build_tstates(&mut self) {
        let family = self.family;
        for socket in &mut self.sockets {
            let tdp = compute_tdp(&socket.cpu, family);
            socket.cpu.tstates = build_tstates(socket.cpu.features, tdp);
        }
    }

    // ─── FADT ──────────────────────────────────────────────────────────────

    /// Move the FADT PM blocks to the configured PM base, in both FADTs if
    /// they differ.
    ///
    /// # Errors
    ///
    /// [`ExitCode::UpdateFadt`] if either FADT cannot be patched.
    pub fn process_fadt_tables(&self, handler: &impl AcpiHandler) -> Result<(), ExitCode> {
        if !self.options.modify_fadt_flag {
            return Ok(());
        }
        let pmbase = self.options.pmbase;
        let patch = |phys| {
            fadt::patch_pm_blocks(handler, phys, pmbase).map_err(|err| {
                log::error!("FADT {phys:#x}: {err}");
                ExitCode::UpdateFadt
            })
        };
        patch(self.tables.fadt)?;
        match self.tables.fadt64 {
            Some(fadt64) if fadt64 != self.tables.fadt => patch(fadt64),
            _ => Ok(()),
        }
    }

    // ─── MADT reconciliation ───────────────────────────────────────────────

    /// Resolve every MADT processor to its socket, core and ACPI name, and
    /// count processors per socket and per core.
    ///
    /// # Errors
    ///
    /// - [`ExitCode::NoLapicFoundInMadt`] if the MADT listed nothing.
    /// - [`ExitCode::FindPkgIndexFromLapic`] if a processor's socket was not
    ///   discovered.
    /// - [`ExitCode::MaxCoresExceeded`] if a core index is out of range.
    /// - [`ExitCode::FindCpuScopeNameSeg`] if the processor map has no
    ///   entry for a processor.
    /// - [`ExitCode::ProcessMadtInfo`] if more processors resolve than can
    ///   be tracked.
    pub fn process_madt_info(&mut self) -> Result<(), ExitCode> {
        if self.madt.lapics.is_empty() {
            return Err(ExitCode::NoLapicFoundInMadt);
        }
        self.lapics.clear();
        for socket in &mut self.sockets {
            socket.logical_cpus = 0;
            socket.core_logical_cpus = [0; MAX_CORES];
        }
        for &info in &self.madt.lapics {
            let pkg_index = self
                .sockets
                .iter()
                .position(|s| {
                    info.apic_id.checked_shr(s.cpu.intra_package_mask_width).unwrap_or(0) == s.socket_id
                })
                .ok_or_else(|| {
                    log::error!("no socket owns APIC id {:#x}", info.apic_id);
                    ExitCode::FindPkgIndexFromLapic
                })?;

            let socket = &mut self.sockets[pkg_index];
            let core_index = socket.cpu.core_index(info.apic_id);
            let core_apic_id = socket.cpu.core_apic_id(info.apic_id);
            if core_index as usize >= MAX_CORES {
                log::error!("APIC id {:#x}: core index {core_index} out of range", info.apic_id);
                return Err(ExitCode::MaxCoresExceeded);
            }
            socket.logical_cpus += 1;
            socket.core_logical_cpus[core_index as usize] += 1;

            let namepath = *self.options.cpu_map_entry(info.acpi_id).ok_or_else(|| {
                log::error!("no processor name for ACPI id {}", info.acpi_id);
                ExitCode::FindCpuScopeNameSeg
            })?;

            push_record(
                &mut self.lapics,
                LapicRecord {
                    info,
                    pkg_index,
                    core_index,
                    core_apic_id,
                    namepath,
                },
            )?;
        }
        Ok(())
    }
}

/// Append `record`, failing the reconciliation stage instead of dropping a
/// processor.
fn push_record(
    lapics: &mut ArrayVec<LapicRecord, MAX_LOGICAL_CPU>,
    record: LapicRecord,
) -> Result<(), ExitCode> {
    lapics.try_push(record).map_err(|_| {
        log::error!("APIC id {:#x}: more than {MAX_LOGICAL_CPU} processors", record.info.apic_id);
        ExitCode::ProcessMadtInfo
    })
}

#[cfg(test)]
mod tests {
    use pmrc_acpi::aml::NameSeg;

    use super::*;
    use crate::msr;
    use crate::testing::{MockCpu, MockSmp, lapic, named};

    fn discovered<'o>(options: &'o mut Options, smp: &mut MockSmp) -> PlatformHost<'o> {
        let bsp = MockCpu::sandy_bridge(0);
        let mut host = PlatformHost::new(options, &bsp);
        host.collect_socket_info(smp).unwrap();
        host
    }

    #[test]
    fn new_clears_the_previous_run() {
        let mut options = Options::default();
        options.exit_state.record(ExitCode::BuildSsdt);
        options.exit_state.ssdt_mem_addr = 0x1234;
        let host = PlatformHost::new(&mut options, &MockCpu::sandy_bridge(0));
        assert_eq!(host.family, CpuFamily::SandyBridge);
        assert!(host.options.exit_state.error_codes.is_empty());
        assert_eq!(host.options.exit_state.ssdt_mem_addr, 0);
    }

    #[test]
    fn unknown_family_is_informational() {
        let mut options = Options::default();
        let host = PlatformHost::new(&mut options, &MockCpu::new());
        assert_eq!(host.family, CpuFamily::Unknown);
        assert_eq!(host.options.exit_state.error_codes.as_slice(), [ExitCode::UnsupportedProcessor]);
    }

    #[test]
    fn one_proxy_per_socket() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(2, 4);
        let host = discovered(&mut options, &mut smp);
        assert_eq!(host.sockets.len(), 2);
        assert_eq!(host.sockets[0].socket_id, 0);
        assert_eq!(host.sockets[1].socket_id, 1);
        assert_eq!(host.sockets[1].cpu.x2apic_id, 0x10);
        assert_eq!(smp.rounds, 1);
    }

    #[test]
    fn fifth_socket_fails_collection() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(5, 1);
        let bsp = MockCpu::sandy_bridge(0);
        let mut host = PlatformHost::new(&mut options, &bsp);
        assert_eq!(host.collect_socket_info(&mut smp), Err(ExitCode::CollectSocketInfo));
        assert_eq!(host.smp_exit.error_codes.as_slice(), [ExitCode::SocketProxySave]);
        assert_eq!(host.sockets.len(), MAX_CPU_SOCKETS);
    }

    #[test]
    fn shut_down_host_ignores_callbacks() {
        let mut options = Options::default();
        let bsp = MockCpu::sandy_bridge(0);
        let mut host = PlatformHost::new(&mut options, &bsp);
        host.shutdown(ExitCode::ProcessMadt, false);
        host.find_socket_proxy(&bsp);
        host.record_smp(ExitCode::GpfDetected);
        assert!(host.sockets.is_empty());
        assert!(host.smp_exit.is_empty());
        assert!(!host.options.exit_state.return_status);
    }

    #[test]
    fn negotiation_drops_what_any_socket_lacks() {
        let mut options = Options {
            pstate_coordination: 0x42,
            performance_per_watt: 2,
            ..Options::default()
        };
        let mut smp = MockSmp::sandy_bridge(2, 1);
        let mut host = discovered(&mut options, &mut smp);
        host.sockets[1].cpu.features.remove(CpuFeatures::ACPI_THROTTLING | CpuFeatures::ENERGY_PERF_BIAS);
        host.determine_configuration();
        assert!(host.pstates_enabled);
        assert!(host.turbo_enabled);
        assert!(host.cstates_enabled);
        assert!(!host.tstates_enabled);
        assert_eq!(host.pstate_coordination, PstateCoordination::HwAll);
        assert_eq!(host.perf_per_watt, PerformancePerWatt::Traditional);
    }

    #[test]
    fn narrow_ratio_range_disables_pstates_platform_wide() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(1, 1)
            .map_cpus(|cpu| cpu.with_msr(msr::PLATFORM_INFO, (20 << 40) | (20 << 8)));
        let mut host = discovered(&mut options, &mut smp);
        host.determine_configuration();
        host.turbo_enabled = false;
        host.build_pstates();
        assert!(!host.pstates_enabled);
    }

    #[test]
    fn tables_are_built_per_socket() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(2, 2);
        let mut host = discovered(&mut options, &mut smp);
        host.determine_configuration();
        host.build_pstates();
        host.build_cstates();
        host.build_tstates();
        for socket in &host.sockets {
            assert_eq!(socket.cpu.pstates[0].ratio, 35);
            assert!(!socket.cpu.mwait_cstates.is_empty());
            assert_eq!(socket.cpu.mwait_cstates.len(), socket.cpu.io_cstates.len());
            assert_eq!(socket.cpu.tstates.len(), 15);
        }
        assert!(host.pstates_enabled);
    }

    #[test]
    fn madt_processors_resolve_to_sockets_and_cores() {
        let mut options = Options::default();
        options.cpu_map.extend([named(0), named(1), named(2), named(3)]);
        let mut smp = MockSmp::sandy_bridge(2, 2);
        let mut host = discovered(&mut options, &mut smp);
        host.madt.lapics.extend([lapic(0, 0), lapic(1, 1), lapic(0x10, 2), lapic(0x13, 3)]);
        host.process_madt_info().unwrap();

        assert_eq!(host.lapics.len(), 4);
        assert_eq!(host.lapics[2].pkg_index, 1);
        assert_eq!(host.lapics[3].core_index, 1);
        assert_eq!(host.lapics[3].core_apic_id, 0x12);
        assert_eq!(host.lapics[1].namepath.nameseg[0], NameSeg(*b"CP01"));
        assert_eq!(host.sockets[0].logical_cpus, 2);
        assert_eq!(host.sockets[0].threads_in_core(0), 2);
        assert_eq!(host.sockets[1].threads_in_core(0), 1);
        assert_eq!(host.sockets[1].threads_in_core(1), 1);
    }

    #[test]
    fn madt_reconciliation_failures() {
        let mut options = Options::default();
        options.cpu_map.push(named(0));
        let mut smp = MockSmp::sandy_bridge(1, 1);
        let mut host = discovered(&mut options, &mut smp);

        assert_eq!(host.process_madt_info(), Err(ExitCode::NoLapicFoundInMadt));

        host.madt.lapics.push(lapic(0x20, 0));
        assert_eq!(host.process_madt_info(), Err(ExitCode::FindPkgIndexFromLapic));

        host.madt.lapics[0] = lapic(0, 7);
        assert_eq!(host.process_madt_info(), Err(ExitCode::FindCpuScopeNameSeg));

        host.sockets[0].cpu.core_select_mask = 0xFFFF;
        host.madt.lapics[0] = lapic(0xFF, 0);
        host.sockets[0].cpu.intra_package_mask_width = 16;
        assert_eq!(host.process_madt_info(), Err(ExitCode::MaxCoresExceeded));
    }

    #[test]
    fn fadt_gate_skips_patching() {
        let mut options = Options {
            modify_fadt_flag: false,
            ..Options::default()
        };
        let host = PlatformHost::new(&mut options, &MockCpu::sandy_bridge(0));
        // No tables were located; a patch attempt would fail.
        let mem = pmrc_acpi::testing::TestMemory::low_memory();
        assert_eq!(host.process_fadt_tables(&mem), Ok(()));
    }

    #[test]
    fn full_processor_list_fails_instead_of_dropping() {
        let record = LapicRecord {
            info: lapic(0, 0),
            pkg_index: 0,
            core_index: 0,
            core_apic_id: 0,
            namepath: named(0),
        };
        let mut lapics = ArrayVec::new();
        for _ in 0..MAX_LOGICAL_CPU {
            push_record(&mut lapics, record).unwrap();
        }
        assert_eq!(push_record(&mut lapics, record), Err(ExitCode::ProcessMadtInfo));
        assert_eq!(lapics.len(), MAX_LOGICAL_CPU);
    }
}
