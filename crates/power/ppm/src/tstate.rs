//! Throttling state tables, from on-demand clock modulation duty cycles.

use arrayvec::ArrayVec;

use crate::socket::CpuFeatures;

/// Most T-states published per socket.
pub const MAX_TSTATES: usize = 15;

/// One T-state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tstate {
    /// Duty cycle in percent.
    pub freq_percent: u32,
    /// Power in mW.
    pub power: u32,
    /// Transition latency in microseconds.
    pub latency: u32,
    /// IA32_CLOCK_MODULATION control value.
    pub control: u32,
    /// Status value.
    pub status: u32,
}

/// A socket's T-state table, full speed first.
pub type TstateTable = ArrayVec<Tstate, MAX_TSTATES>;

/// 12.5% steps.
const COARSE: [(u32, u32); 8] = [
    (100, 0x00),
    (88, 0x1E),
    (75, 0x1C),
    (63, 0x1A),
    (50, 0x18),
    (38, 0x16),
    (25, 0x14),
    (13, 0x12),
];

/// 6.25% steps.
const FINE: [(u32, u32); 15] = [
    (100, 0x00),
    (94, 0x1F),
    (88, 0x1E),
    (81, 0x1D),
    (75, 0x1C),
    (69, 0x1B),
    (63, 0x1A),
    (56, 0x19),
    (50, 0x18),
    (44, 0x17),
    (38, 0x16),
    (31, 0x15),
    (25, 0x14),
    (19, 0x13),
    (13, 0x12),
];

/// Build the T-state table for a socket with package TDP `tdp` watts.
#[must_use]
pub fn build_tstates(features: CpuFeatures, tdp: u32) -> TstateTable {
    let steps: &[(u32, u32)] = if features.contains(CpuFeatures::FINE_CLOCK_MODULATION) {
        &FINE
    } else {
        &COARSE
    };
    let count = steps.len() as u32;
    steps
        .iter()
        .zip(0u32..)
        .map(|(&(freq_percent, control), index)| Tstate {
            freq_percent,
            power: 1000u32.saturating_mul(tdp.saturating_mul(count - index)) / count,
            latency: 0,
            control,
            status: 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_table_without_fine_modulation() {
        let table = build_tstates(CpuFeatures::empty(), 80);
        assert_eq!(table.len(), 8);
        assert_eq!(table[0].power, 80_000);
        assert_eq!(table[7].freq_percent, 13);
        assert_eq!(table[7].control, 0x12);
        assert_eq!(table[7].power, 10_000);
    }

    #[test]
    fn fine_table_with_fine_modulation() {
        let table = build_tstates(CpuFeatures::FINE_CLOCK_MODULATION, 95);
        assert_eq!(table.len(), 15);
        assert_eq!(table[1].control, 0x1F);
        assert_eq!(table[14].power, 1000 * 95 / 15);
        assert!(table.iter().all(|t| t.latency == 0 && t.status == 0));
    }
}
