//! Idle state tables.
//!
//! Two tables are built per socket: one for MWAIT entry through functional
//! fixed hardware and one for legacy I/O-port entry relative to the PM base.
//! The OS-side `_CST` picks between them at runtime.

use arrayvec::ArrayVec;
use pmrc_acpi::gas::{GenericAddress, space};

use crate::options::C3Policy;
use crate::socket::{CpuDetails, CpuFeatures};

/// Most C-states in either table.
pub const MAX_CSTATES: usize = 5;

/// One published C-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cstate {
    /// Entry register.
    pub register: GenericAddress,
    /// ACPI C-state type (1, 2 or 3).
    pub kind: u8,
    /// Worst-case exit latency in microseconds.
    pub latency: u16,
    /// Average power in mW.
    pub power: u32,
}

/// A socket's C-state table, shallowest first.
pub type CstateTable = ArrayVec<Cstate, MAX_CSTATES>;

/// Hardware idle states the engine can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoreState {
    C1,
    C3AsC2,
    C3AsC3,
    C6,
    C7,
}

impl CoreState {
    const fn kind(self) -> u8 {
        match self {
            Self::C1 => 1,
            Self::C3AsC2 => 2,
            Self::C3AsC3 | Self::C6 | Self::C7 => 3,
        }
    }

    const fn latency(self) -> u16 {
        match self {
            Self::C1 => 0x01,
            Self::C3AsC2 | Self::C3AsC3 => 0x40,
            Self::C6 | Self::C7 => 0x60,
        }
    }

    const fn power(self) -> u32 {
        match self {
            Self::C1 => 1000,
            Self::C3AsC2 | Self::C3AsC3 => 500,
            Self::C6 => 350,
            Self::C7 => 200,
        }
    }

    /// MWAIT hint.
    const fn mwait_hint(self) -> u64 {
        match self {
            Self::C1 => 0x00,
            Self::C3AsC2 | Self::C3AsC3 => 0x10,
            Self::C6 => 0x20,
            Self::C7 => 0x30,
        }
    }

    /// Offset of the P_LVLx register from the PM base.
    const fn level_offset(self) -> u32 {
        match self {
            Self::C1 => 0,
            Self::C3AsC2 | Self::C3AsC3 => 0x14,
            Self::C6 => 0x15,
            Self::C7 => 0x16,
        }
    }

    fn entry(self, register: GenericAddress) -> Cstate {
        Cstate {
            register,
            kind: self.kind(),
            latency: self.latency(),
            power: self.power(),
        }
    }

    fn mwait(self) -> Cstate {
        // Vendor 1 (Intel), class 2 (native C-state), bus-master avoidance.
        self.entry(GenericAddress::new(space::FUNCTIONAL_FIXED_HW, 1, 2, 1, self.mwait_hint()))
    }

    fn io(self, pmbase: u32) -> Cstate {
        let register = match self {
            Self::C1 => GenericAddress::new(space::FUNCTIONAL_FIXED_HW, 0, 0, 0, 0),
            _ => GenericAddress::new(
                space::SYSTEM_IO,
                8,
                0,
                0,
                u64::from(pmbase.wrapping_add(self.level_offset())),
            ),
        };
        self.entry(register)
    }
}

/// Policy inputs to C-state selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CstatePolicy {
    /// How C3 is published.
    pub c3: C3Policy,
    /// Publish C6.
    pub c6: bool,
    /// Publish C7.
    pub c7: bool,
    /// PM I/O base for the I/O-port table.
    pub pmbase: u32,
}

fn selected_states(cpu: &CpuDetails, policy: &CstatePolicy) -> ArrayVec<CoreState, MAX_CSTATES> {
    let features = cpu.features;
    let invariant = features.contains(CpuFeatures::INVARIANT_TIMER);
    let c3 = features.contains(CpuFeatures::CORE_C3);

    let mut states = ArrayVec::new();
    states.push(CoreState::C1);
    if c3 && (policy.c3 == C3Policy::AsC2 || (policy.c3 == C3Policy::Auto && invariant)) {
        states.push(CoreState::C3AsC2);
    }
    if c3 && (policy.c3 == C3Policy::AsC3 || (policy.c3 == C3Policy::Auto && !invariant)) {
        states.push(CoreState::C3AsC3);
    }
    if features.contains(CpuFeatures::CORE_C6) && policy.c6 {
        states.push(CoreState::C6);
    }
    if features.contains(CpuFeatures::CORE_C7) && policy.c7 {
        states.push(CoreState::C7);
    }
    states
}

/// Build the MWAIT and I/O-port C-state tables for one socket.
#[must_use]
pub fn build_cstates(cpu: &CpuDetails, policy: &CstatePolicy) -> (CstateTable, CstateTable) {
    let states = selected_states(cpu, policy);
    let mwait = states.iter().map(|s| s.mwait()).collect();
    let io = states.iter().map(|s| s.io(policy.pmbase)).collect();
    (mwait, io)
}
