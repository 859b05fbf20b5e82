//! Per-socket discovery.
//!
//! [`collect_cpu_info`] runs on the first logical processor seen in each
//! socket and snapshots everything later stages need: CPUID leaves, ratio
//! limits, power limits, topology masks and C-state support. The record is
//! written only there; the orchestrator reads it afterwards.

use bitflags::bitflags;

use crate::cpu::{self, CpuFamily};
use crate::cstate::CstateTable;
use crate::msr::{self, MiscEnable, MiscPwrMgmt, PowerCtl};
use crate::platform::{Cpu, CpuidRegs};
use crate::pstate::PstateTable;
use crate::tstate::TstateTable;

/// Most sockets tracked.
pub const MAX_CPU_SOCKETS: usize = 4;
/// Most cores tracked per socket.
pub const MAX_CORES: usize = 16;

/// TURBO_POWER_CURRENT_LIMIT value assumed when the register faults.
const DEFAULT_TURBO_POWER_CURRENT_LIMIT: u64 = 0x02A8_02F8;

bitflags! {
    /// Capabilities reported by CPUID and the platform MSRs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CpuFeatures: u32 {
        /// Enhanced Intel SpeedStep (CPUID.1 ECX[7]).
        const EIST = 1 << 0;
        /// Turbo reported by CPUID.6 EAX[1].
        const TURBO_CPUID = 1 << 1;
        /// Turbo disable bit set in IA32_MISC_ENABLE (turbo present but off).
        const TURBO_MISC = 1 << 2;
        /// ACPI thermal monitor and clock control (CPUID.1 EDX[22]).
        const ACPI_THROTTLING = 1 << 3;
        /// MONITOR/MWAIT extensions (CPUID.5 ECX[0]).
        const MWAIT = 1 << 4;
        /// APIC timer runs in deep C-states (CPUID.6 EAX[2]).
        const INVARIANT_TIMER = 1 << 5;
        /// Fine-grained clock modulation (CPUID.6 EAX[5]).
        const FINE_CLOCK_MODULATION = 1 << 6;
        /// IA32_ENERGY_PERF_BIAS is usable.
        const ENERGY_PERF_BIAS = 1 << 7;
        /// Programmable TDC/TDP limits for turbo (PLATFORM_INFO[29]).
        const TDC_TDP_LIMITS = 1 << 8;
        /// Programmable ratio limits for turbo (PLATFORM_INFO[28]).
        const RATIO_LIMITS = 1 << 9;
        /// MWAIT C1 sub-states.
        const CORE_C1 = 1 << 10;
        /// MWAIT C3 sub-states.
        const CORE_C3 = 1 << 11;
        /// MWAIT C6 sub-states.
        const CORE_C6 = 1 << 12;
        /// MWAIT C7 sub-states.
        const CORE_C7 = 1 << 13;
    }
}

impl CpuFeatures {
    /// Turbo can be used, either reported directly or present but disabled.
    #[must_use]
    pub const fn turbo_available(self) -> bool {
        self.intersects(Self::TURBO_CPUID.union(Self::TURBO_MISC))
    }

    /// Extreme edition: turbo limits are programmable.
    #[must_use]
    pub const fn xe_available(self) -> bool {
        self.intersects(Self::TDC_TDP_LIMITS.union(Self::RATIO_LIMITS))
    }
}

/// One socket's capability snapshot and state tables.
#[derive(Debug, Clone, Default)]
pub struct CpuDetails {
    /// CPUID leaf 1.
    pub cpuid1: CpuidRegs,
    /// CPUID leaf 5.
    pub cpuid5: CpuidRegs,
    /// CPUID leaf 6, re-read after enabling the energy-performance bias.
    pub cpuid6: CpuidRegs,
    /// CPUID leaf 0xB, SMT level.
    pub cpuid_b0: CpuidRegs,
    /// CPUID leaf 0xB, core level.
    pub cpuid_b1: CpuidRegs,
    /// Decoded capabilities.
    pub features: CpuFeatures,
    /// x2APIC id of the probing processor.
    pub x2apic_id: u32,
    /// Lowest ratio.
    pub min_ratio: u32,
    /// Highest non-turbo ratio as configured.
    pub max_ratio_as_cfg: u32,
    /// Highest non-turbo ratio from the brand string (P1), or 0.
    pub max_ratio_as_mfg: u32,
    /// Turbo TDP limit in 1/8 W (legacy families).
    pub tdp_limit: u32,
    /// Turbo TDC limit in 1/8 A (legacy families).
    pub tdc_limit: u32,
    /// PKG_RAPL_POWER_LIMIT (server-class families).
    pub package_power_limit: u64,
    /// RAPL_POWER_UNIT (server-class families).
    pub power_unit: u64,
    /// Deepest package C-state the hardware allows.
    pub package_cstate_limit: u32,
    /// APIC id bits below the socket id.
    pub intra_package_mask_width: u32,
    /// APIC id bits selecting the thread within a core.
    pub smt_mask_width: u32,
    /// Mask of the thread bits.
    pub smt_select_mask: u32,
    /// Mask of the core bits.
    pub core_select_mask: u32,
    /// P-states, fastest first.
    pub pstates: PstateTable,
    /// C-states entered through MWAIT.
    pub mwait_cstates: CstateTable,
    /// C-states entered through P_LVLx reads.
    pub io_cstates: CstateTable,
    /// T-states, full speed first.
    pub tstates: TstateTable,
}

impl CpuDetails {
    /// Index of the core containing `apic_id` within its socket.
    #[must_use]
    pub const fn core_index(&self, apic_id: u32) -> u32 {
        (apic_id & self.core_select_mask) >> self.smt_mask_width
    }

    /// `apic_id` with the thread bits cleared.
    #[must_use]
    pub const fn core_apic_id(&self, apic_id: u32) -> u32 {
        apic_id & !self.smt_select_mask
    }
}

/// A discovered socket.
#[derive(Debug, Clone, Default)]
pub struct SocketInfo {
    /// Socket portion of the APIC id.
    pub socket_id: u32,
    /// Logical processors in the MADT that belong to this socket.
    pub logical_cpus: u32,
    /// Logical processors per core, indexed by core index.
    pub core_logical_cpus: [u32; MAX_CORES],
    /// Capabilities and tables.
    pub cpu: CpuDetails,
}

impl SocketInfo {
    /// Logical processors sharing the core at `core_index`.
    #[must_use]
    pub fn threads_in_core(&self, core_index: u32) -> u32 {
        self.core_logical_cpus.get(core_index as usize).copied().unwrap_or(0)
    }
}

/// The socket id of the calling processor.
pub fn current_socket_id(cpu: &impl Cpu) -> u32 {
    let b1 = cpu.cpuid(cpu::LEAF_TOPOLOGY, 1);
    b1.edx.checked_shr(b1.eax & 0x1F).unwrap_or(0)
}

fn read_or_zero(cpu: &impl Cpu, msr: msr::Msr) -> u64 {
    cpu.read_msr(msr).unwrap_or_else(|fault| {
        log::debug!("{fault}, reading as zero");
        0
    })
}

fn flag(condition: bool, feature: CpuFeatures) -> CpuFeatures {
    if condition { feature } else { CpuFeatures::empty() }
}

/// Probe the calling processor's socket.
pub fn collect_cpu_info(cpu: &impl Cpu, family: CpuFamily) -> CpuDetails {
    let cpuid1 = cpu.cpuid(cpu::LEAF_FEATURES, 0);
    let cpuid5 = cpu.cpuid(cpu::LEAF_MWAIT, 0);
    let mut cpuid6 = cpu.cpuid(cpu::LEAF_POWER, 0);
    let cpuid_b0 = cpu.cpuid(cpu::LEAF_TOPOLOGY, 0);
    let cpuid_b1 = cpu.cpuid(cpu::LEAF_TOPOLOGY, 1);

    let misc_enable = MiscEnable::from_bits_retain(read_or_zero(cpu, msr::IA32_MISC_ENABLE));
    let platform_info = read_or_zero(cpu, msr::PLATFORM_INFO);

    let mut features = flag(cpuid1.ecx & (1 << 7) != 0, CpuFeatures::EIST)
        | flag(cpuid6.eax & (1 << 1) != 0, CpuFeatures::TURBO_CPUID)
        | flag(misc_enable.contains(MiscEnable::TURBO_DISABLE), CpuFeatures::TURBO_MISC)
        | flag(cpuid1.edx & (1 << 22) != 0, CpuFeatures::ACPI_THROTTLING)
        | flag(cpuid5.ecx & 1 != 0, CpuFeatures::MWAIT)
        | flag(cpuid6.eax & (1 << 2) != 0, CpuFeatures::INVARIANT_TIMER)
        | flag(cpuid6.eax & (1 << 5) != 0, CpuFeatures::FINE_CLOCK_MODULATION)
        | flag(platform_info & (1 << 29) != 0, CpuFeatures::TDC_TDP_LIMITS)
        | flag(platform_info & (1 << 28) != 0, CpuFeatures::RATIO_LIMITS)
        | flag((cpuid5.edx >> 4) & 0xF != 0, CpuFeatures::CORE_C1)
        | flag((cpuid5.edx >> 8) & 0xF != 0, CpuFeatures::CORE_C3)
        | flag((cpuid5.edx >> 12) & 0xF != 0, CpuFeatures::CORE_C6)
        | flag((cpuid5.edx >> 16) & 0xF != 0, CpuFeatures::CORE_C7);

    let (tdp_limit, tdc_limit) = if family.is_server_class() {
        (0, 0)
    } else {
        let limits = cpu
            .read_msr(msr::TURBO_POWER_CURRENT_LIMIT)
            .unwrap_or(DEFAULT_TURBO_POWER_CURRENT_LIMIT);
        ((limits & 0x7FFF) as u32, ((limits >> 16) & 0x7FFF) as u32)
    };

    let intra_package_mask_width = cpuid_b1.eax & 0x1F;
    let smt_mask_width = cpuid_b0.eax & 0x1F;
    let smt_select_mask = !u32::MAX.checked_shl(smt_mask_width).unwrap_or(0);
    let core_select_mask = !u32::MAX.checked_shl(intra_package_mask_width).unwrap_or(0) ^ smt_select_mask;

    let package_cstate_limit = (read_or_zero(cpu, msr::PKG_CST_CONFIG_CONTROL) & 0b111) as u32;

    if detect_energy_perf_bias(cpu, family) {
        features |= CpuFeatures::ENERGY_PERF_BIAS;
        // Enabling the bias can expose a new leaf 6 flag.
        cpuid6 = cpu.cpuid(cpu::LEAF_POWER, 0);
    }

    let (package_power_limit, power_unit) = if family.is_server_class() {
        (
            read_or_zero(cpu, msr::PKG_RAPL_POWER_LIMIT),
            read_or_zero(cpu, msr::RAPL_POWER_UNIT),
        )
    } else {
        (0, 0)
    };

    let details = CpuDetails {
        cpuid1,
        cpuid5,
        cpuid6,
        cpuid_b0,
        cpuid_b1,
        features,
        x2apic_id: cpuid_b1.edx,
        min_ratio: ((platform_info >> 40) & 0xFF) as u32,
        max_ratio_as_cfg: ((platform_info >> 8) & 0xFF) as u32,
        max_ratio_as_mfg: cpu::max_ratio_from_brand(cpu, family.bclk_mhz()),
        tdp_limit,
        tdc_limit,
        package_power_limit,
        power_unit,
        package_cstate_limit,
        intra_package_mask_width,
        smt_mask_width,
        smt_select_mask,
        core_select_mask,
        ..CpuDetails::default()
    };
    log::debug!(
        "socket probe on x2APIC {:#x}: ratios {}..={} (P1 {}), features {:?}",
        details.x2apic_id,
        details.min_ratio,
        details.max_ratio_as_cfg,
        details.max_ratio_as_mfg,
        details.features,
    );
    details
}

/// Make IA32_ENERGY_PERF_BIAS visible and report whether it can be used.
///
/// Any fault along the way means the register is unsupported.
pub fn detect_energy_perf_bias(cpu: &impl Cpu, family: CpuFamily) -> bool {
    let visible = if family.is_server_class() {
        cpu.read_msr(msr::POWER_CTL).and_then(|value| {
            let value = PowerCtl::from_bits_retain(value) | PowerCtl::ENERGY_PERF_BIAS_VISIBLE;
            cpu.write_msr(msr::POWER_CTL, value.bits())
        })
    } else {
        cpu.read_msr(msr::MISC_PWR_MGMT).and_then(|value| {
            let value = MiscPwrMgmt::from_bits_retain(value) | MiscPwrMgmt::ENERGY_PERF_BIAS_VISIBLE;
            cpu.write_msr(msr::MISC_PWR_MGMT, value.bits())
        })
    };
    if let Err(fault) = visible {
        log::debug!("energy-performance bias unsupported: {fault}");
        return false;
    }
    if cpu.cpuid(cpu::LEAF_POWER, 0).ecx & (1 << 3) == 0 {
        return false;
    }
    cpu.read_msr(msr::IA32_ENERGY_PERF_BIAS).is_ok()
}
