//! Processor names and the PM base, recovered from the DSDT.
//!
//! Callers that do not supply a processor map can derive one from the
//! `Processor()` declarations the firmware already publishes. The P_BLK
//! address of each declaration sits 0x10 above the PM base.

use arrayvec::ArrayVec;
use pmrc_acpi::aml::{AmlScanner, NameSeg};
use pmrc_acpi::{AcpiError, AcpiHandler, fadt, sdt};

use crate::options::{CPU_MAP_LIMIT, CpuMapEntry, CpuNamespace, MAX_SUPPORTED_CPU_NAMESEGS, Options};

/// Offset of P_BLK from the PM base.
const PBLK_OFFSET: u32 = 0x10;

/// Why a processor map could not be derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CpuMapError {
    /// The DSDT could not be loaded.
    #[error("DSDT: {0}")]
    Dsdt(#[from] AcpiError),
    /// The DSDT declares no processors.
    #[error("no processors declared in the DSDT")]
    NoProcessors,
    /// The DSDT declares more processors than the map holds.
    #[error("the DSDT declares more processors than the map holds")]
    TooManyProcessors,
    /// Two processors imply different PM bases.
    #[error("inconsistent PM base addresses {0:#x} and {1:#x}")]
    InconsistentPmBase(u32, u32),
    /// No processor carries a P_BLK address.
    #[error("no PM base found in the DSDT")]
    NoPmBase,
    /// A processor path is too deep, or declared at the root.
    #[error("processor path depth {0} out of range")]
    PathDepth(usize),
    /// Processors live under different roots.
    #[error("processor namespaces inconsistent")]
    MixedNamespaces,
    /// Processors live under a root other than `\_PR_` or `\_SB_`.
    #[error("processors found under {0:?}, not _PR_ or _SB_")]
    InvalidNamespace(NameSeg),
}

/// A processor map with the PM base and namespace root it implies.
#[derive(Debug, Clone)]
pub struct CpuMap {
    /// One entry per declared processor, in declaration order.
    pub entries: ArrayVec<CpuMapEntry, CPU_MAP_LIMIT>,
    /// PM I/O base.
    pub pmbase: u32,
    /// Root every processor was declared under.
    pub namespace: CpuNamespace,
}

impl CpuMap {
    /// Walk the DSDT at `dsdt` and map every declared processor.
    ///
    /// `scanner` keeps the processors it recorded, ready for
    /// [`ConflictPass`](crate::splice::ConflictPass).
    ///
    /// # Errors
    ///
    /// See [`CpuMapError`].
    pub fn from_dsdt(
        handler: &impl AcpiHandler,
        dsdt: u64,
        scanner: &mut AmlScanner,
    ) -> Result<Self, CpuMapError> {
        let table = sdt::load_table(handler, dsdt, fadt::DSDT_SIGNATURE)?;
        if let Err(stop) = scanner.walk(table.body()) {
            log::debug!("DSDT walk stopped at {:#x} (opcode {:#04x})", stop.offset, stop.opcode);
        }
        if scanner.dropped() > 0 {
            return Err(CpuMapError::TooManyProcessors);
        }
        Self::from_scanner(scanner)
    }

    fn from_scanner(scanner: &AmlScanner) -> Result<Self, CpuMapError> {
        let processors = scanner.processors();
        if processors.is_empty() {
            return Err(CpuMapError::NoProcessors);
        }
        if processors.len() > CPU_MAP_LIMIT {
            return Err(CpuMapError::TooManyProcessors);
        }

        let mut pmbase = None;
        let mut root = None;
        let mut entries = ArrayVec::new();
        for processor in processors {
            if processor.pblk != 0 {
                let derived = processor.pblk.wrapping_sub(PBLK_OFFSET);
                match pmbase {
                    Some(known) if known != derived => {
                        return Err(CpuMapError::InconsistentPmBase(known, derived));
                    }
                    _ => pmbase = Some(derived),
                }
            }

            let segs = processor.path.segments();
            if !(2..=MAX_SUPPORTED_CPU_NAMESEGS + 1).contains(&segs.len()) {
                return Err(CpuMapError::PathDepth(segs.len()));
            }
            match root {
                Some(known) if known != segs[0] => return Err(CpuMapError::MixedNamespaces),
                _ => root = Some(segs[0]),
            }

            let mut nameseg = [NameSeg(*b"____"); MAX_SUPPORTED_CPU_NAMESEGS];
            nameseg[..segs.len() - 1].copy_from_slice(&segs[1..]);
            entries.push(CpuMapEntry {
                acpi_processor_number: u32::from(processor.acpi_id),
                seg_count: (segs.len() - 1) as u32,
                nameseg,
            });
        }

        let pmbase = pmbase.ok_or(CpuMapError::NoPmBase)?;
        let namespace = match root {
            Some(NameSeg::PR) => CpuNamespace::Pr,
            Some(NameSeg::SB) => CpuNamespace::Sb,
            Some(other) => return Err(CpuMapError::InvalidNamespace(other)),
            None => return Err(CpuMapError::NoProcessors),
        };
        log::debug!("{} processor(s) under {namespace:?}, PM base {pmbase:#x}", entries.len());
        Ok(Self {
            entries,
            pmbase,
            namespace,
        })
    }

    /// Use this map, PM base and namespace for the next run.
    pub fn apply(&self, options: &mut Options) {
        options.cpu_map.clone_from(&self.entries);
        options.pmbase = self.pmbase;
        options.cpu_namespace_flag = self.namespace.flag();
    }
}
