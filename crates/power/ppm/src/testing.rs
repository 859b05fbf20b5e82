//! Scripted processors for host-side tests.

extern crate std;

use core::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::vec::Vec;

use arrayvec::ArrayVec;
use pmrc_acpi::aml::NameSeg;
use pmrc_acpi::madt::{LapicInfo, LapicKind, MAX_LOGICAL_CPU};

use crate::cpu;
use crate::host::PlatformHost;
use crate::msr::{self, Msr};
use crate::options::{CpuMapEntry, Options};
use crate::platform::{Cpu, CpuidRegs, MsrFault, Smp};

/// A processor with fixed CPUID answers and an MSR map.
#[derive(Debug, Default, Clone)]
pub struct MockCpu {
    cpuid: BTreeMap<(u32, u32), CpuidRegs>,
    msrs: RefCell<BTreeMap<u32, u64>>,
    faulting: BTreeSet<u32>,
    writes: RefCell<Vec<(u32, u64)>>,
}

impl MockCpu {
    /// A processor that answers zero to every leaf and has no MSRs set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A four-core, two-thread Sandy Bridge part with four x2APIC bits per
    /// socket, 16..=34 ratios, 95 W TDP and every idle state.
    #[must_use]
    pub fn sandy_bridge(x2apic_id: u32) -> Self {
        let regs = |eax, ebx, ecx, edx| CpuidRegs { eax, ebx, ecx, edx };
        Self::new()
            .with_cpuid(cpu::LEAF_FEATURES, 0, regs(0x206A7, 0, (1 << 7) | (1 << 3), 1 << 22))
            .with_cpuid(cpu::LEAF_MWAIT, 0, regs(0x40, 0x40, 0b11, 0x0001_1120))
            .with_cpuid(cpu::LEAF_POWER, 0, regs(0b10_0111, 2, 0b1001, 0))
            .with_cpuid(cpu::LEAF_TOPOLOGY, 0, regs(1, 2, 0x100, x2apic_id))
            .with_cpuid(cpu::LEAF_TOPOLOGY, 1, regs(4, 8, 0x201, x2apic_id))
            .with_brand("Intel(R) Core(TM) i7-2600 CPU @ 3.40GHz")
            .with_msr(msr::PLATFORM_INFO, (16 << 40) | (1 << 29) | (1 << 28) | (34 << 8))
            .with_msr(msr::IA32_MISC_ENABLE, 0)
            .with_msr(msr::PKG_CST_CONFIG_CONTROL, 0x0000_0403)
            .with_msr(msr::PMG_IO_CAPTURE_BASE, 0)
            .with_msr(msr::IA32_PERF_CTL, 0)
            .with_msr(msr::MISC_PWR_MGMT, 0)
            .with_msr(msr::IA32_ENERGY_PERF_BIAS, 6)
            .with_msr(msr::POWER_CTL, 0)
            .with_msr(msr::PKG_RAPL_POWER_LIMIT, 95 * 8)
            .with_msr(msr::RAPL_POWER_UNIT, 0x000A_1003)
            .with_msr(msr::PKGC3_IRTL, 0)
            .with_msr(msr::PKGC6_IRTL, 0)
            .with_msr(msr::PKGC7_IRTL, 0)
    }

    /// Answer `regs` for `leaf`/`subleaf`.
    #[must_use]
    pub fn with_cpuid(mut self, leaf: u32, subleaf: u32, regs: CpuidRegs) -> Self {
        self.cpuid.insert((leaf, subleaf), regs);
        self
    }

    /// Answer the brand string leaves with `brand`.
    #[must_use]
    pub fn with_brand(mut self, brand: &str) -> Self {
        let mut raw = [0u8; 48];
        let len = brand.len().min(47);
        raw[..len].copy_from_slice(&brand.as_bytes()[..len]);
        self.cpuid.insert(
            (cpu::LEAF_EXT_MAX, 0),
            CpuidRegs {
                eax: 0x8000_0008,
                ..CpuidRegs::default()
            },
        );
        for (chunk, leaf) in raw.chunks_exact(16).zip(cpu::LEAF_BRAND_FIRST..) {
            let word = |i: usize| u32::from_le_bytes([chunk[i], chunk[i + 1], chunk[i + 2], chunk[i + 3]]);
            self.cpuid.insert(
                (leaf, 0),
                CpuidRegs {
                    eax: word(0),
                    ebx: word(4),
                    ecx: word(8),
                    edx: word(12),
                },
            );
        }
        self
    }

    /// Start `msr` at `value`.
    #[must_use]
    pub fn with_msr(self, msr: Msr, value: u64) -> Self {
        self.msrs.borrow_mut().insert(msr.address(), value);
        self
    }

    /// Make every access to `msr` fault.
    #[must_use]
    pub fn faulting(mut self, msr: Msr) -> Self {
        self.faulting.insert(msr.address());
        self
    }

    /// Current value of `msr`, if it exists.
    #[must_use]
    pub fn msr(&self, msr: Msr) -> Option<u64> {
        self.msrs.borrow().get(&msr.address()).copied()
    }

    /// Every successful write, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(u32, u64)> {
        self.writes.borrow().clone()
    }
}

impl Cpu for MockCpu {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidRegs {
        self.cpuid.get(&(leaf, subleaf)).copied().unwrap_or_default()
    }

    fn read_msr(&self, msr: Msr) -> Result<u64, MsrFault> {
        if self.faulting.contains(&msr.address()) {
            return Err(MsrFault(msr));
        }
        self.msrs.borrow().get(&msr.address()).copied().ok_or(MsrFault(msr))
    }

    fn write_msr(&self, msr: Msr, value: u64) -> Result<(), MsrFault> {
        if self.faulting.contains(&msr.address()) {
            return Err(MsrFault(msr));
        }
        self.msrs.borrow_mut().insert(msr.address(), value);
        self.writes.borrow_mut().push((msr.address(), value));
        Ok(())
    }
}

/// A set of [`MockCpu`]s keyed by APIC id. The first is the bootstrap
/// processor.
#[derive(Debug, Default)]
pub struct MockSmp {
    cpus: Vec<(u32, MockCpu)>,
    /// Broadcast rounds started.
    pub rounds: usize,
}

impl MockSmp {
    /// Processors in wake order.
    #[must_use]
    pub fn new(cpus: Vec<(u32, MockCpu)>) -> Self {
        Self { cpus, rounds: 0 }
    }

    /// `count` Sandy Bridge threads per socket on `sockets` sockets, with
    /// APIC ids laid out as the preset's topology leaves describe.
    #[must_use]
    pub fn sandy_bridge(sockets: u32, threads: u32) -> Self {
        let cpus = (0..sockets)
            .flat_map(|socket| (0..threads).map(move |thread| (socket << 4) | thread))
            .map(|apic| (apic, MockCpu::sandy_bridge(apic)))
            .collect();
        Self::new(cpus)
    }

    /// The processor with `apic_id`.
    ///
    /// # Panics
    ///
    /// If there is none.
    #[must_use]
    pub fn cpu(&self, apic_id: u32) -> &MockCpu {
        self.cpus
            .iter()
            .find(|(id, _)| *id == apic_id)
            .map(|(_, cpu)| cpu)
            .expect("no such APIC id")
    }

    /// Apply `f` to every processor.
    pub fn for_each_cpu(&mut self, mut f: impl FnMut(&mut MockCpu)) {
        for (_, cpu) in &mut self.cpus {
            f(cpu);
        }
    }

    /// Replace every processor with `f(cpu)`.
    #[must_use]
    pub fn map_cpus(mut self, f: impl Fn(MockCpu) -> MockCpu) -> Self {
        self.cpus = self.cpus.into_iter().map(|(id, cpu)| (id, f(cpu))).collect();
        self
    }
}

impl Smp for MockSmp {
    type Cpu = MockCpu;

    fn start(&mut self) -> ArrayVec<u32, MAX_LOGICAL_CPU> {
        self.rounds += 1;
        self.cpus.iter().map(|(id, _)| *id).take(MAX_LOGICAL_CPU).collect()
    }

    fn current(&self) -> &MockCpu {
        &self.cpus[0].1
    }

    fn run_on(&mut self, apic_id: u32, f: &mut dyn FnMut(&MockCpu)) {
        if let Some((_, cpu)) = self.cpus.iter().find(|(id, _)| *id == apic_id) {
            f(cpu);
        }
    }
}

/// `CPUn` for ACPI processor `acpi_id`, directly under the namespace root.
pub fn named(acpi_id: u32) -> CpuMapEntry {
    let digit = |n: u32| b'0' + u8::try_from(n % 10).unwrap();
    CpuMapEntry {
        acpi_processor_number: acpi_id,
        seg_count: 1,
        nameseg: [
            NameSeg([b'C', b'P', digit(acpi_id / 10), digit(acpi_id)]),
            NameSeg(*b"____"),
            NameSeg(*b"____"),
        ],
    }
}

/// An xAPIC MADT entry.
pub fn lapic(apic_id: u32, acpi_id: u32) -> LapicInfo {
    LapicInfo {
        kind: LapicKind::LocalApic,
        apic_id,
        acpi_id,
    }
}

/// A host that has run every stage up to MADT reconciliation against
/// `smp`, with one MADT entry and one processor name per processor.
pub fn prepared_host<'o>(options: &'o mut Options, smp: &mut MockSmp) -> PlatformHost<'o> {
    let apic_ids: Vec<u32> = smp.cpus.iter().map(|(id, _)| *id).collect();
    let mut host = PlatformHost::new(options, smp.current());
    host.collect_socket_info(smp).unwrap();
    host.determine_configuration();
    host.build_pstates();
    host.build_cstates();
    host.build_tstates();
    for (acpi_id, apic_id) in (0u32..).zip(apic_ids) {
        host.madt.lapics.push(lapic(apic_id, acpi_id));
        host.options.cpu_map.push(named(acpi_id));
    }
    host.process_madt_info().unwrap();
    host
}
