//! The hardware capability surface the engine runs against.
//!
//! The engine never executes `cpuid`, `rdmsr`, or `wrmsr` itself. A [`Cpu`]
//! performs them on the processor it stands for, and an [`Smp`] runs a
//! callback on each logical processor in turn. Firmware provides real
//! implementations; tests script them.

use arrayvec::ArrayVec;
use pmrc_acpi::madt::MAX_LOGICAL_CPU;

use crate::msr::Msr;

/// The four output registers of one `cpuid` leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidRegs {
    /// EAX.
    pub eax: u32,
    /// EBX.
    pub ebx: u32,
    /// ECX.
    pub ecx: u32,
    /// EDX.
    pub edx: u32,
}

/// An MSR access raised a general-protection fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("access to MSR {:#x} faulted", .0.address())]
pub struct MsrFault(pub Msr);

/// One logical processor, seen from code running on it.
pub trait Cpu {
    /// Execute `cpuid` with `leaf` in EAX and `subleaf` in ECX.
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidRegs;

    /// Read `msr`.
    ///
    /// # Errors
    ///
    /// [`MsrFault`] if the read faulted.
    fn read_msr(&self, msr: Msr) -> Result<u64, MsrFault>;

    /// Write `value` to `msr`.
    ///
    /// # Errors
    ///
    /// [`MsrFault`] if the write faulted.
    fn write_msr(&self, msr: Msr, value: u64) -> Result<(), MsrFault>;
}

/// Broadcast execution across logical processors.
///
/// Each call to [`Smp::run_on`] completes before it returns; there is no
/// preemption and no nesting.
pub trait Smp {
    /// The processor handle passed to callbacks.
    type Cpu: Cpu;

    /// Wake every processor and return the APIC ids that responded.
    fn start(&mut self) -> ArrayVec<u32, MAX_LOGICAL_CPU>;

    /// The processor executing the orchestrator.
    fn current(&self) -> &Self::Cpu;

    /// Run `f` on the processor with `apic_id` and wait for it to finish.
    fn run_on(&mut self, apic_id: u32, f: &mut dyn FnMut(&Self::Cpu));
}

/// Run `f` once on every processor that answers [`Smp::start`].
pub fn run_on_all<S: Smp>(smp: &mut S, f: &mut dyn FnMut(&S::Cpu)) {
    for apic_id in smp.start() {
        smp.run_on(apic_id, f);
    }
}
