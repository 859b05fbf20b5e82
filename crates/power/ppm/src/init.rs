//! Final per-processor register programming.
//!
//! Runs on every logical processor once the tables are built. Register
//! faults are logged and the step is skipped; nothing here fails the run.

use crate::cpu::CpuFamily;
use crate::host::PlatformHost;
use crate::msr::{self, MiscEnable, MiscPwrMgmt, Msr, PkgCstConfig, PowerCtl, irtl};
use crate::options::PerformancePerWatt;
use crate::platform::Cpu;
use crate::socket::{self, SocketInfo};

/// PMG_IO_CAPTURE_BASE range field: redirect every C-state level.
const IO_CAPTURE_ALL_CSTATES: u64 = 2 << 16;

/// LVL2 register offset from the PM base.
const LVL2_OFFSET: u32 = 0x14;

/// Package C-state limit encodings above this are reserved.
const MAX_PACKAGE_CSTATE_LIMIT: u32 = 7;

/// Read `reg`, let `f` compute the new value, and write it back.
fn modify(cpu: &impl Cpu, reg: Msr, f: impl FnOnce(u64) -> u64) {
    let result = cpu.read_msr(reg).and_then(|value| cpu.write_msr(reg, f(value)));
    if let Err(fault) = result {
        log::warn!("skipping {fault}");
    }
}

fn write(cpu: &impl Cpu, reg: Msr, value: u64) {
    if let Err(fault) = cpu.write_msr(reg, value) {
        log::warn!("skipping {fault}");
    }
}

/// IA32_ENERGY_PERF_BIAS value for `policy`.
const fn energy_perf_bias(family: CpuFamily, policy: PerformancePerWatt) -> u64 {
    if family.is_server_class() {
        match policy {
            PerformancePerWatt::LowPower => 7,
            PerformancePerWatt::Balanced => 4,
            PerformancePerWatt::Traditional => 0,
        }
    } else {
        match policy {
            PerformancePerWatt::Traditional => 0,
            _ => 4,
        }
    }
}

impl PlatformHost<'_> {
    /// Broadcast callback: program the calling processor.
    pub fn init_logical_cpu(&self, cpu: &impl Cpu) {
        let socket_id = socket::current_socket_id(cpu);
        let Some(socket) = self.sockets.iter().find(|s| s.socket_id == socket_id) else {
            log::warn!("no socket {socket_id} discovered, processor left unprogrammed");
            return;
        };
        let details = &socket.cpu;
        let options = &*self.options;

        // EIST stays enabled even with P-states off so an in-flight
        // transition can complete.
        let turbo_available = details.features.turbo_available();
        let turbo_enabled = self.turbo_enabled;
        modify(cpu, msr::IA32_MISC_ENABLE, |value| {
            let mut bits = MiscEnable::from_bits_retain(value) | MiscEnable::EIST;
            if turbo_available {
                bits.set(MiscEnable::TURBO_DISABLE, !turbo_enabled);
            }
            bits.bits()
        });

        modify(cpu, msr::MISC_PWR_MGMT, |value| {
            (MiscPwrMgmt::from_bits_retain(value) - MiscPwrMgmt::EIST_HW_COORDINATION_DISABLE).bits()
        });

        if let Some(p0) = details.pstates.first() {
            write(cpu, msr::IA32_PERF_CTL, u64::from(self.family.encode_pstate(p0.ratio)));
        }

        let limit = options
            .package_cstate_limit
            .min(MAX_PACKAGE_CSTATE_LIMIT)
            .min(details.package_cstate_limit);
        modify(cpu, msr::PKG_CST_CONFIG_CONTROL, |value| {
            let mut bits = PkgCstConfig::from_bits_retain(value)
                | PkgCstConfig::C1_AUTO_DEMOTION
                | PkgCstConfig::C3_AUTO_DEMOTION;
            if !bits.contains(PkgCstConfig::CFG_LOCK) {
                bits = (bits - PkgCstConfig::LIMIT)
                    | PkgCstConfig::from_bits_retain(u64::from(limit))
                    | PkgCstConfig::IO_MWAIT_REDIRECTION;
            }
            bits.bits()
        });

        let lvl2 = options.pmbase.wrapping_add(LVL2_OFFSET);
        write(cpu, msr::PMG_IO_CAPTURE_BASE, IO_CAPTURE_ALL_CSTATES | u64::from(lvl2));

        let c1e = options.c1e_enabled;
        modify(cpu, msr::POWER_CTL, |value| {
            let mut bits = PowerCtl::from_bits_retain(value);
            bits.set(PowerCtl::C1E, c1e);
            bits.bits()
        });

        if socket::detect_energy_perf_bias(cpu, self.family) {
            write(cpu, msr::IA32_ENERGY_PERF_BIAS, energy_perf_bias(self.family, self.perf_per_watt));
        }

        if self.family.is_server_class() {
            program_response_time_limits(cpu, socket);
        }
    }
}

/// Package C-state interrupt response time limits, scaled by core count,
/// and auto-undemotion.
fn program_response_time_limits(cpu: &impl Cpu, socket: &SocketInfo) {
    let x2apic = cpu.cpuid(crate::cpu::LEAF_TOPOLOGY, 1).edx;
    let threads = socket.threads_in_core(socket.cpu.core_index(x2apic));
    let core_count = socket.logical_cpus.checked_div(threads).unwrap_or(0);
    let deep_limit = if core_count == 4 { 0x5B } else { 0x54 };

    modify(cpu, msr::PKGC3_IRTL, |value| irtl::program(value, irtl::UNIT_32768NS, 2));
    modify(cpu, msr::PKGC6_IRTL, |value| irtl::program(value, irtl::UNIT_1024NS, deep_limit));
    modify(cpu, msr::PKGC7_IRTL, |value| irtl::program(value, irtl::UNIT_1024NS, deep_limit));

    modify(cpu, msr::PKG_CST_CONFIG_CONTROL, |value| {
        (PkgCstConfig::from_bits_retain(value)
            | PkgCstConfig::C1_AUTO_UNDEMOTION
            | PkgCstConfig::C3_AUTO_UNDEMOTION)
            .bits()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::testing::{MockCpu, MockSmp, prepared_host};

    fn value(cpu: &MockCpu, reg: Msr) -> u64 {
        cpu.msr(reg).unwrap()
    }

    #[test]
    fn programs_a_server_class_processor() {
        let mut options = Options {
            performance_per_watt: 2,
            ..Options::default()
        };
        let mut smp = MockSmp::sandy_bridge(1, 2);
        let host = prepared_host(&mut options, &mut smp);
        let cpu = smp.cpu(1);
        host.init_logical_cpu(cpu);

        let misc = MiscEnable::from_bits_retain(value(cpu, msr::IA32_MISC_ENABLE));
        assert!(misc.contains(MiscEnable::EIST));
        assert!(!misc.contains(MiscEnable::TURBO_DISABLE));
        assert_eq!(value(cpu, msr::IA32_PERF_CTL), 35 << 8);
        assert_eq!(value(cpu, msr::PMG_IO_CAPTURE_BASE), (2 << 16) | 0x414);
        assert_eq!(value(cpu, msr::POWER_CTL) & PowerCtl::C1E.bits(), PowerCtl::C1E.bits());
        assert_eq!(value(cpu, msr::IA32_ENERGY_PERF_BIAS), 7);

        let pkg = PkgCstConfig::from_bits_retain(value(cpu, msr::PKG_CST_CONFIG_CONTROL));
        assert_eq!(pkg.bits() & PkgCstConfig::LIMIT.bits(), 3);
        assert!(pkg.contains(
            PkgCstConfig::IO_MWAIT_REDIRECTION
                | PkgCstConfig::C1_AUTO_DEMOTION
                | PkgCstConfig::C3_AUTO_DEMOTION
                | PkgCstConfig::C1_AUTO_UNDEMOTION
                | PkgCstConfig::C3_AUTO_UNDEMOTION
        ));

        // One core with two threads.
        assert_eq!(value(cpu, msr::PKGC3_IRTL), irtl::program(0, irtl::UNIT_32768NS, 2));
        assert_eq!(value(cpu, msr::PKGC6_IRTL), irtl::program(0, irtl::UNIT_1024NS, 0x54));
    }

    #[test]
    fn disabled_policy_clears_turbo_and_c1e() {
        let mut options = Options {
            turbo_enabled: false,
            c1e_enabled: false,
            package_cstate_limit: 1,
            ..Options::default()
        };
        let mut smp = MockSmp::sandy_bridge(1, 1).map_cpus(|cpu| cpu.with_msr(msr::POWER_CTL, 0b10));
        let host = prepared_host(&mut options, &mut smp);
        let cpu = smp.cpu(0);
        host.init_logical_cpu(cpu);

        let misc = MiscEnable::from_bits_retain(value(cpu, msr::IA32_MISC_ENABLE));
        assert!(misc.contains(MiscEnable::EIST | MiscEnable::TURBO_DISABLE));
        assert_eq!(value(cpu, msr::POWER_CTL) & PowerCtl::C1E.bits(), 0);
        assert_eq!(value(cpu, msr::PKG_CST_CONFIG_CONTROL) & 0b111, 1);
        assert_eq!(value(cpu, msr::IA32_ENERGY_PERF_BIAS), 0);
    }

    #[test]
    fn locked_package_config_keeps_its_limit() {
        let locked = 0x403 | PkgCstConfig::CFG_LOCK.bits();
        let mut options = Options {
            package_cstate_limit: 1,
            ..Options::default()
        };
        let mut smp = MockSmp::sandy_bridge(1, 1)
            .map_cpus(|cpu| cpu.with_msr(msr::PKG_CST_CONFIG_CONTROL, locked));
        let host = prepared_host(&mut options, &mut smp);
        let cpu = smp.cpu(0);
        host.init_logical_cpu(cpu);

        let pkg = value(cpu, msr::PKG_CST_CONFIG_CONTROL);
        assert_eq!(pkg & 0xFFFF, locked & 0xFFFF);
        assert_ne!(pkg & PkgCstConfig::C1_AUTO_DEMOTION.bits(), 0);
    }

    #[test]
    fn faults_skip_only_their_step() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(1, 1).map_cpus(|cpu| cpu.faulting(msr::IA32_MISC_ENABLE));
        let host = prepared_host(&mut options, &mut smp);
        let cpu = smp.cpu(0);
        host.init_logical_cpu(cpu);

        assert_eq!(value(cpu, msr::IA32_MISC_ENABLE), 0);
        assert_eq!(value(cpu, msr::IA32_PERF_CTL), 35 << 8);
    }

    #[test]
    fn unknown_socket_is_left_alone() {
        let mut options = Options::default();
        let mut smp = MockSmp::sandy_bridge(1, 1);
        let host = prepared_host(&mut options, &mut smp);
        let stranger = MockCpu::sandy_bridge(0x30);
        host.init_logical_cpu(&stranger);
        assert!(stranger.writes().is_empty());
    }

    #[test]
    fn legacy_bias_is_two_valued() {
        assert_eq!(energy_perf_bias(CpuFamily::Nehalem, PerformancePerWatt::LowPower), 4);
        assert_eq!(energy_perf_bias(CpuFamily::Nehalem, PerformancePerWatt::Traditional), 0);
        assert_eq!(energy_perf_bias(CpuFamily::Jaketown, PerformancePerWatt::Balanced), 4);
    }
}
