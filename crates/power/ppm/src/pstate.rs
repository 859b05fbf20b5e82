//! Performance state tables.
//!
//! Ratios are spread evenly from the configured maximum down to the minimum,
//! with the turbo entry (when enabled) one ratio above the maximum at index
//! 0. Power comes from a family-specific fixed-point model and is reported
//! in milliwatts.

use arrayvec::ArrayVec;
use pmrc_acpi::{div_u64, mul_u64};

use crate::cpu::CpuFamily;
use crate::socket::CpuDetails;

/// Most P-states published per socket.
pub const MAX_PSTATES: usize = 16;

/// Legacy power-model fixed-point scale.
const PRECISION_FACTOR: u32 = 30;
const PRECISION_FACTOR_CUBED: u32 = PRECISION_FACTOR * PRECISION_FACTOR * PRECISION_FACTOR;

/// One P-state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pstate {
    /// Core ratio.
    pub ratio: u32,
    /// Core frequency in MHz.
    pub frequency: u32,
    /// Power in mW.
    pub power: u32,
}

/// A socket's P-state table, index 0 fastest.
pub type PstateTable = ArrayVec<Pstate, MAX_PSTATES>;

/// Number of P-states for a ratio range, or 0 when fewer than two would
/// result.
#[must_use]
pub fn compute_num_pstates(max: u32, min: u32, turbo: bool, limit: u32) -> u32 {
    let range = (max + 1).saturating_sub(min);
    let states = range + u32::from(turbo);
    let num = states.min(limit);
    if num < 2 { 0 } else { num }
}

/// Ratio of P-state `index` in a table of `num` states.
#[must_use]
pub fn compute_pstate_ratio(max: u32, min: u32, turbo: bool, num: u32, index: u32) -> u32 {
    let turbo = u32::from(turbo);
    let range = max.saturating_sub(min);
    if index == 0 {
        return max + turbo;
    }
    if range == 0 {
        return max;
    }
    let gaps = num.saturating_sub(1 + turbo);
    let adjusted = index - turbo;
    let step = (adjusted * range + gaps / 2).checked_div(gaps).unwrap_or(0);
    max.saturating_sub(step)
}

/// Package TDP in watts.
#[must_use]
pub fn compute_tdp(cpu: &CpuDetails, family: CpuFamily) -> u32 {
    if family.is_server_class() {
        let limit = cpu.package_power_limit & 0x7FFF;
        let unit = cpu.power_unit & 0xF;
        let tdp = div_u64(limit, 1 << unit).map_or(0, |(q, _)| q);
        u32::try_from(tdp).unwrap_or(u32::MAX)
    } else {
        cpu.tdp_limit / 8
    }
}

/// Power in watts at `ratio`, below the manufactured maximum.
#[must_use]
pub fn compute_pstate_power(cpu: &CpuDetails, family: CpuFamily, ratio: u32, tdp: u32) -> u32 {
    let p1 = cpu.max_ratio_as_mfg;
    if family.is_server_class() {
        // ((1.1 - (P1 - ratio) * 0.00625) / 1.1)^2, scaled by 10^5.
        let quot = |n: u64, d: u64| div_u64(n, d).map_or(0, |(q, _)| q);
        let mut m = u64::from(p1.saturating_sub(ratio)) * 625;
        m = 110_000u64.saturating_sub(m);
        m = quot(m, 11);
        m = quot(mul_u64(m, m).0, 1000);

        let mut power = mul_u64(u64::from(ratio), m).0;
        power = mul_u64(power, u64::from(tdp)).0;
        power = quot(power, u64::from(p1));
        power = quot(power, 100_000);
        u32::try_from(power).unwrap_or(u32::MAX)
    } else {
        // (ratio / P1)^3 * core TDP + uncore TDP
        let core = cpu.tdc_limit / 8;
        let uncore = tdp.saturating_sub(core);
        let factor = (ratio * PRECISION_FACTOR).checked_div(p1).unwrap_or(0);
        let cubed = u64::from(factor).pow(3) * u64::from(core) / u64::from(PRECISION_FACTOR_CUBED);
        u32::try_from(cubed).unwrap_or(u32::MAX).saturating_add(uncore)
    }
}

/// Build the P-state table for one socket.
///
/// An empty table means the ratio range cannot produce two states, which
/// disables P-states for the whole platform.
#[must_use]
pub fn build_pstates(cpu: &CpuDetails, family: CpuFamily, turbo: bool) -> PstateTable {
    let max = cpu.max_ratio_as_cfg;
    let min = cpu.min_ratio;
    let num = compute_num_pstates(max, min, turbo, MAX_PSTATES as u32);
    let bclk = family.bclk_mhz();
    let tdp = compute_tdp(cpu, family);

    (0..num)
        .map(|index| {
            let ratio = compute_pstate_ratio(max, min, turbo, num, index);
            let frequency = if index == 0 && turbo {
                ratio.saturating_sub(1) * bclk + 1
            } else {
                ratio * bclk
            };
            let watts = if ratio >= cpu.max_ratio_as_mfg {
                tdp
            } else {
                compute_pstate_power(cpu, family, ratio, tdp)
            };
            Pstate {
                ratio,
                frequency,
                power: watts.saturating_mul(1000),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn details(min: u32, max: u32) -> CpuDetails {
        CpuDetails {
            min_ratio: min,
            max_ratio_as_cfg: max,
            max_ratio_as_mfg: max,
            // 95 W in 1/8 W units.
            package_power_limit: 95 * 8,
            power_unit: 3,
            tdp_limit: 95 * 8,
            tdc_limit: 80 * 8,
            ..CpuDetails::default()
        }
    }

    #[test]
    fn wide_range_is_clipped_to_sixteen() {
        assert_eq!(compute_num_pstates(34, 8, false, 16), 16);
        let table = build_pstates(&details(8, 34), CpuFamily::SandyBridge, false);
        assert_eq!(table.len(), 16);
        assert_eq!(table[0].ratio, 34);
        assert_eq!(table[15].ratio, 8);
        assert!(table.windows(2).all(|w| w[0].ratio >= w[1].ratio));
        assert!(table.windows(2).all(|w| w[0].power >= w[1].power));
    }

    #[test]
    fn turbo_entry_sits_one_ratio_up() {
        let table = build_pstates(&details(16, 34), CpuFamily::SandyBridge, true);
        assert_eq!(table[0].ratio, 35);
        assert_eq!(table[0].frequency, 34 * 100 + 1);
        assert_eq!(table[1].ratio, 34);
        assert_eq!(table[1].frequency, 3400);
        assert_eq!(table[0].power, 95_000);
    }

    #[test]
    fn too_narrow_a_range_yields_nothing() {
        assert_eq!(compute_num_pstates(12, 12, false, 16), 0);
        assert!(build_pstates(&details(12, 12), CpuFamily::Nehalem, false).is_empty());
        assert_eq!(compute_num_pstates(10, 12, false, 16), 0);
        assert_eq!(compute_num_pstates(12, 12, true, 16), 2);
    }

    #[test]
    fn legacy_power_model() {
        let cpu = details(9, 20);
        // ratio factor 15, 15^3 * 80 / 27000 + 15
        assert_eq!(compute_pstate_power(&cpu, CpuFamily::Nehalem, 10, 95), 10 + 15);
        assert_eq!(compute_tdp(&cpu, CpuFamily::Nehalem), 95);
    }

    #[test]
    fn server_power_model_is_below_tdp() {
        let cpu = details(16, 34);
        let tdp = compute_tdp(&cpu, CpuFamily::Jaketown);
        assert_eq!(tdp, 95);
        let power = compute_pstate_power(&cpu, CpuFamily::Jaketown, 16, tdp);
        assert!(power > 0 && power < tdp);
    }
}
