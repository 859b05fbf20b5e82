//! Model-specific registers touched by the power-management pass.

/// A model-specific register, identified by its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Msr(pub u32);

impl Msr {
    /// The register address.
    #[must_use]
    pub const fn address(self) -> u32 {
        self.0
    }
}

/// MSR_PLATFORM_INFO: ratio limits and turbo capability bits.
pub const PLATFORM_INFO: Msr = Msr(0x00CE);
/// MSR_PKG_CST_CONFIG_CONTROL: package C-state limit and demotion control.
pub const PKG_CST_CONFIG_CONTROL: Msr = Msr(0x00E2);
/// MSR_PMG_IO_CAPTURE_BASE: I/O redirection base and range.
pub const PMG_IO_CAPTURE_BASE: Msr = Msr(0x00E4);
/// IA32_PERF_CTL: requested P-state.
pub const IA32_PERF_CTL: Msr = Msr(0x0199);
/// IA32_MISC_ENABLE.
pub const IA32_MISC_ENABLE: Msr = Msr(0x01A0);
/// MSR_MISC_PWR_MGMT.
pub const MISC_PWR_MGMT: Msr = Msr(0x01AA);
/// MSR_TURBO_POWER_CURRENT_LIMIT (legacy families).
pub const TURBO_POWER_CURRENT_LIMIT: Msr = Msr(0x01AC);
/// IA32_ENERGY_PERF_BIAS.
pub const IA32_ENERGY_PERF_BIAS: Msr = Msr(0x01B0);
/// MSR_POWER_CTL.
pub const POWER_CTL: Msr = Msr(0x01FC);
/// MSR_RAPL_POWER_UNIT.
pub const RAPL_POWER_UNIT: Msr = Msr(0x0606);
/// MSR_PKGC3_IRTL.
pub const PKGC3_IRTL: Msr = Msr(0x060A);
/// MSR_PKGC6_IRTL.
pub const PKGC6_IRTL: Msr = Msr(0x060B);
/// MSR_PKGC7_IRTL.
pub const PKGC7_IRTL: Msr = Msr(0x060C);
/// MSR_PKG_RAPL_POWER_LIMIT.
pub const PKG_RAPL_POWER_LIMIT: Msr = Msr(0x0610);

bitflags::bitflags! {
    /// IA32_MISC_ENABLE bits this pass reads or writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MiscEnable: u64 {
        /// Enhanced Intel SpeedStep enable.
        const EIST = 1 << 16;
        /// Turbo mode disable.
        const TURBO_DISABLE = 1 << 38;
    }
}

bitflags::bitflags! {
    /// MSR_PKG_CST_CONFIG_CONTROL bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PkgCstConfig: u64 {
        /// Maximum package C-state (3-bit field).
        const LIMIT = 0b111;
        /// I/O MWAIT redirection enable.
        const IO_MWAIT_REDIRECTION = 1 << 10;
        /// CFG lock; bits [15:0] are read-only once set.
        const CFG_LOCK = 1 << 15;
        /// C3 auto-demotion enable.
        const C3_AUTO_DEMOTION = 1 << 25;
        /// C1 auto-demotion enable.
        const C1_AUTO_DEMOTION = 1 << 26;
        /// C3 auto-undemotion enable.
        const C3_AUTO_UNDEMOTION = 1 << 27;
        /// C1 auto-undemotion enable.
        const C1_AUTO_UNDEMOTION = 1 << 28;

        const _ = !0;
    }
}

bitflags::bitflags! {
    /// MSR_POWER_CTL bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PowerCtl: u64 {
        /// C1E enable.
        const C1E = 1 << 1;
        /// Makes IA32_ENERGY_PERF_BIAS visible (server-class families).
        const ENERGY_PERF_BIAS_VISIBLE = 1 << 18;

        const _ = !0;
    }
}

bitflags::bitflags! {
    /// MSR_MISC_PWR_MGMT bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MiscPwrMgmt: u64 {
        /// Disables EIST hardware coordination when set.
        const EIST_HW_COORDINATION_DISABLE = 1 << 0;
        /// Makes IA32_ENERGY_PERF_BIAS visible (legacy families).
        const ENERGY_PERF_BIAS_VISIBLE = 1 << 1;

        const _ = !0;
    }
}

/// Fields of the package C-state interrupt response time limit registers.
pub mod irtl {
    /// Time unit field, bits [12:10].
    pub const TIME_UNIT_SHIFT: u32 = 10;
    /// Time unit field mask (before shifting).
    pub const TIME_UNIT_MASK: u64 = 0b111;
    /// Time limit field, bits [9:0].
    pub const TIME_LIMIT_MASK: u64 = (1 << 10) - 1;
    /// Limit valid.
    pub const VALID: u64 = 1 << 15;
    /// 1024 ns time unit.
    pub const UNIT_1024NS: u64 = 2;
    /// 32768 ns time unit.
    pub const UNIT_32768NS: u64 = 3;

    /// Replace the unit and limit fields of `value` and mark it valid.
    #[must_use]
    pub const fn program(value: u64, unit: u64, limit: u64) -> u64 {
        let cleared = value & !(TIME_UNIT_MASK << TIME_UNIT_SHIFT) & !TIME_LIMIT_MASK;
        cleared | (unit << TIME_UNIT_SHIFT) | (limit & TIME_LIMIT_MASK) | VALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irtl_fields_are_replaced() {
        let programmed = irtl::program(0xFFFF_FFFF, irtl::UNIT_1024NS, 0x5B);
        assert_eq!(programmed & 0x3FF, 0x5B);
        assert_eq!((programmed >> 10) & 0b111, 2);
        assert_ne!(programmed & irtl::VALID, 0);
        assert_eq!(programmed >> 16, 0xFFFF);
    }
}
