//! Per-processor control methods.
//!
//! Every builder appends one complete object to the writer. Names inside a
//! processor scope (`TYPE`, `PSEN`, `CSEN`, `MWOS`, `TSEN`) are declared by
//! [`state_variables`]; the methods read them at runtime and `_PDC`/`_OSC`
//! store the OS capabilities into `TYPE`.

use pmrc_acpi::aml::opcode::{self, ext};
use pmrc_acpi::aml::{AmlError, AmlWriter, NameSeg};
use pmrc_acpi::gas::{GenericAddress, space};

use crate::cpu::CpuFamily;
use crate::cstate::Cstate;
use crate::options::PstateCoordination;
use crate::pstate::Pstate;
use crate::tstate::Tstate;

const fn seg(name: &[u8; 4]) -> NameSeg {
    NameSeg(*name)
}

const TYPE: NameSeg = seg(b"TYPE");
const PSEN: NameSeg = seg(b"PSEN");
const CSEN: NameSeg = seg(b"CSEN");
const MWOS: NameSeg = seg(b"MWOS");
const TSEN: NameSeg = seg(b"TSEN");

const CAPA: NameSeg = seg(b"CAPA");
const REVS: NameSeg = seg(b"REVS");
const SIZE: NameSeg = seg(b"SIZE");
const TEMP: NameSeg = seg(b"TEMP");
const STS0: NameSeg = seg(b"STS0");
const CAP0: NameSeg = seg(b"CAP0");
const UID0: NameSeg = seg(b"UID0");
const IID: [NameSeg; 4] = [seg(b"IID0"), seg(b"IID1"), seg(b"IID2"), seg(b"IID3")];
const EID: [NameSeg; 4] = [seg(b"EID0"), seg(b"EID1"), seg(b"EID2"), seg(b"EID3")];

/// Processor vendor-specific `_OSC` UUID, 4077A616-290C-47BE-9EBD-D87058713953.
const PROCESSOR_OSC_UUID: [u8; 16] = [
    0x16, 0xA6, 0x77, 0x40, 0x0C, 0x29, 0xBE, 0x47, 0x9E, 0xBD, 0xD8, 0x70, 0x58, 0x71, 0x39, 0x53,
];

/// OS capability bits each method tests in `TYPE`.
mod capability {
    /// `_TSS` is understood.
    pub const TSS: u16 = 0x0004;
    /// `_CSD` is understood.
    pub const CSD: u32 = 0x0040;
    /// `_TSD` is understood.
    pub const TSD: u32 = 0x0080;
    /// Native C-states through MWAIT.
    pub const MWAIT_CST: u16 = 0x0200;
    /// `_PSD` is understood, with either coordination.
    pub const PSD: u32 = 0x0820;
    /// Capabilities the platform may grant through `_OSC`.
    pub const GRANTED: u16 = 0x0BFF;
}

/// `_PSS` transition and bus-master latency, in microseconds.
const PSS_LATENCY: u32 = 10;

const FFH_PERF_CTL: GenericAddress = GenericAddress::new(space::FUNCTIONAL_FIXED_HW, 0x40, 0, 0, 0x199);
const FFH_PERF_STATUS: GenericAddress = GenericAddress::new(space::FUNCTIONAL_FIXED_HW, 0x10, 0, 0, 0x198);
const FFH_EMPTY: GenericAddress = GenericAddress::new(space::FUNCTIONAL_FIXED_HW, 0, 0, 0, 0);

// ─── Shared fragments ──────────────────────────────────────────────────────

/// `CreateDWordField(<source>, index, name)` where `source` is one opcode.
fn create_dword_field(w: &mut AmlWriter<'_>, source: u8, index: u8, name: NameSeg) -> Result<(), AmlError> {
    w.op(opcode::CREATE_DWORD_FIELD)?;
    w.op(source)?;
    w.byte_const(index)?;
    w.name_seg(name)
}

/// `Store(from, to)` between two names.
fn store_name(w: &mut AmlWriter<'_>, from: NameSeg, to: NameSeg) -> Result<(), AmlError> {
    w.op(opcode::STORE)?;
    w.name_seg(from)?;
    w.name_seg(to)
}

/// `And(TYPE, <const>, Zero)` with the constant already encoded by `mask`.
fn type_test(
    w: &mut AmlWriter<'_>,
    mask: impl FnOnce(&mut AmlWriter<'_>) -> Result<(), AmlError>,
) -> Result<(), AmlError> {
    w.op(opcode::AND)?;
    w.name_seg(TYPE)?;
    mask(w)?;
    w.zero()
}

/// A 16-byte buffer holding the processor `_OSC` UUID.
fn uuid_buffer(w: &mut AmlWriter<'_>) -> Result<(), AmlError> {
    let len = w.small_buffer()?;
    w.byte_const(PROCESSOR_OSC_UUID.len() as u8)?;
    w.bytes(&PROCESSOR_OSC_UUID)?;
    w.finish(len)
}

/// `Store(<byte>, Index(STS0, 0))` then `Return(Arg3)`.
fn fail_osc(w: &mut AmlWriter<'_>, status: u8) -> Result<(), AmlError> {
    w.op(opcode::STORE)?;
    w.byte_const(status)?;
    w.op(opcode::INDEX)?;
    w.name_seg(STS0)?;
    w.byte_const(0)?;
    w.zero()?;
    w.return_op(opcode::ARG0 + 3)
}

/// `And(CAP0, 0x0BFF, CAP0)`.
fn mask_granted(w: &mut AmlWriter<'_>) -> Result<(), AmlError> {
    w.op(opcode::AND)?;
    w.name_seg(CAP0)?;
    w.word_const(capability::GRANTED)?;
    w.name_seg(CAP0)
}

/// A `Package(5) { 5, 0, domain, coordination, count }` dependency entry.
fn dependency_package(w: &mut AmlWriter<'_>, domain: u32, coordination: u32, count: u32) -> Result<(), AmlError> {
    let pkg = w.small_package(5)?;
    w.byte_const(5)?;
    w.byte_const(0)?;
    w.dword_const(domain)?;
    w.dword_const(coordination)?;
    w.dword_const(count)?;
    w.finish(pkg)
}

/// `Method(name) { If (And(TYPE, mask)) { Return(Package(1) { dep }) } Return(Zero) }`
fn dependency_method(
    w: &mut AmlWriter<'_>,
    name: NameSeg,
    mask: u32,
    domain: u32,
    coordination: u32,
    count: u32,
) -> Result<(), AmlError> {
    let method = w.method(name, 0)?;
    let if_len = w.if_op()?;
    type_test(w, |w| w.dword_const(mask))?;
    let ret = w.return_package(1)?;
    dependency_package(w, domain, coordination, count)?;
    w.finish(ret)?;
    w.finish(if_len)?;
    w.return_zero()?;
    w.finish(method)
}

/// `Method(name) { Return(Zero) }`
fn return_zero_method(w: &mut AmlWriter<'_>, name: NameSeg) -> Result<(), AmlError> {
    let method = w.small_method(name, 0)?;
    w.return_zero()?;
    w.finish(method)
}

/// `Method(name) { Return(Package(2) { ResourceTemplate(a), ResourceTemplate(b) }) }`
fn register_pair_method(
    w: &mut AmlWriter<'_>,
    name: NameSeg,
    control: &GenericAddress,
    status: &GenericAddress,
) -> Result<(), AmlError> {
    let method = w.small_method(name, 0)?;
    let ret = w.return_package(2)?;
    w.register_buffer(control)?;
    w.register_buffer(status)?;
    w.finish(ret)?;
    w.finish(method)
}

// ─── Scope variables and capability negotiation ───────────────────────────

/// `TYPE`, `PSEN`, `CSEN`, `MWOS` and `TSEN`.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn state_variables(
    w: &mut AmlWriter<'_>,
    pstates: bool,
    cstates: bool,
    mwait_os: bool,
    tstates: bool,
) -> Result<(), AmlError> {
    w.named_dword(TYPE, 0)?;
    w.named_dword(PSEN, u32::from(pstates))?;
    w.named_dword(CSEN, u32::from(cstates))?;
    w.named_dword(MWOS, u32::from(mwait_os))?;
    w.named_dword(TSEN, u32::from(tstates))
}

/// `_PDC(Arg0)`: record the capabilities DWORD in `TYPE` and forward the
/// buffer to `_OSC` in its format.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn pdc(w: &mut AmlWriter<'_>) -> Result<(), AmlError> {
    let method = w.method(seg(b"_PDC"), 1)?;

    create_dword_field(w, opcode::ARG0, 0x08, CAPA)?;
    store_name(w, CAPA, TYPE)?;
    create_dword_field(w, opcode::ARG0, 0x00, REVS)?;
    create_dword_field(w, opcode::ARG0, 0x04, SIZE)?;

    // Store(SizeOf(Arg0), Local0)
    w.bytes(&[opcode::STORE, opcode::SIZE_OF, opcode::ARG0, opcode::LOCAL0])?;

    // Store(Subtract(Local0, 8), Local1)
    w.bytes(&[opcode::STORE, opcode::SUBTRACT, opcode::LOCAL0])?;
    w.byte_const(0x08)?;
    w.zero()?;
    w.op(opcode::LOCAL0 + 1)?;

    // CreateField(Arg0, 0x40, Multiply(Local1, 8), TEMP)
    w.ext_op(ext::CREATE_FIELD)?;
    w.op(opcode::ARG0)?;
    w.byte_const(0x40)?;
    w.bytes(&[opcode::MULTIPLY, opcode::LOCAL0 + 1])?;
    w.byte_const(0x08)?;
    w.zero()?;
    w.name_seg(TEMP)?;

    // Name(STS0, Buffer(4) {})
    w.op(opcode::NAME)?;
    w.name_seg(STS0)?;
    let buf = w.small_buffer()?;
    w.byte_const(4)?;
    w.bytes(&[opcode::ZERO; 4])?;
    w.finish(buf)?;

    // Concatenate(STS0, TEMP, Local2)
    w.op(opcode::CONCAT)?;
    w.name_seg(STS0)?;
    w.name_seg(TEMP)?;
    w.op(opcode::LOCAL0 + 2)?;

    // _OSC(UUID, REVS, SIZE, Local2)
    w.name_seg(seg(b"_OSC"))?;
    uuid_buffer(w)?;
    w.name_seg(REVS)?;
    w.name_seg(SIZE)?;
    w.op(opcode::LOCAL0 + 2)?;

    w.finish(method)
}

/// `_OSC(UUID, Revision, Count, Capabilities)`: check the UUID and revision,
/// grant the supported capabilities, and record them in `TYPE`.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn osc(w: &mut AmlWriter<'_>) -> Result<(), AmlError> {
    const ARG1: u8 = opcode::ARG0 + 1;
    const ARG3: u8 = opcode::ARG0 + 3;

    let method = w.method(seg(b"_OSC"), 4)?;

    create_dword_field(w, ARG3, 0x04, CAPA)?;
    store_name(w, CAPA, TYPE)?;
    create_dword_field(w, ARG3, 0x00, STS0)?;
    create_dword_field(w, ARG3, 0x04, CAP0)?;
    for (index, &name) in (0u8..).step_by(4).zip(&IID) {
        create_dword_field(w, opcode::ARG0, index, name)?;
    }

    w.op(opcode::NAME)?;
    w.name_seg(UID0)?;
    uuid_buffer(w)?;
    for (index, &name) in (0u8..).step_by(4).zip(&EID) {
        w.op(opcode::CREATE_DWORD_FIELD)?;
        w.name_seg(UID0)?;
        w.byte_const(index)?;
        w.name_seg(name)?;
    }

    // Unrecognized UUID.
    let if_len = w.if_op()?;
    w.bytes(&[opcode::LNOT, opcode::LAND, opcode::LAND])?;
    for (i, (&iid, &eid)) in IID.iter().zip(&EID).enumerate() {
        if i == 2 {
            w.op(opcode::LAND)?;
        }
        w.op(opcode::LEQUAL)?;
        w.name_seg(iid)?;
        w.name_seg(eid)?;
    }
    fail_osc(w, 0x06)?;
    w.finish(if_len)?;

    // Unrecognized revision.
    let if_len = w.if_op()?;
    w.bytes(&[opcode::LNOT, opcode::LEQUAL, ARG1])?;
    w.byte_const(0x01)?;
    fail_osc(w, 0x0A)?;
    w.finish(if_len)?;

    // Query only.
    let if_len = w.if_op()?;
    w.op(opcode::AND)?;
    w.name_seg(STS0)?;
    w.byte_const(0x01)?;
    w.zero()?;
    mask_granted(w)?;
    w.return_op(ARG3)?;
    w.finish(if_len)?;

    mask_granted(w)?;
    store_name(w, CAP0, TYPE)?;
    w.return_op(ARG3)?;

    w.finish(method)
}

// ─── P-states ──────────────────────────────────────────────────────────────

/// `_PSS`, returning `pstates` while `PSEN` is set.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn pss(w: &mut AmlWriter<'_>, family: CpuFamily, pstates: &[Pstate]) -> Result<(), AmlError> {
    let method = w.method(seg(b"_PSS"), 0)?;
    let if_len = w.if_op()?;
    w.name_seg(PSEN)?;
    let ret = w.return_package(pstates.len() as u8)?;
    for pstate in pstates {
        let control = family.encode_pstate(pstate.ratio);
        let pkg = w.small_package(6)?;
        w.dword_const(pstate.frequency)?;
        w.dword_const(pstate.power)?;
        w.dword_const(PSS_LATENCY)?;
        w.dword_const(PSS_LATENCY)?;
        w.dword_const(control)?;
        w.dword_const(control)?;
        w.finish(pkg)?;
    }
    w.finish(ret)?;
    w.finish(if_len)?;
    w.return_zero()?;
    w.finish(method)
}

/// `_PCT`: IA32_PERF_CTL and IA32_PERF_STATUS through functional fixed
/// hardware.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn pct(w: &mut AmlWriter<'_>) -> Result<(), AmlError> {
    register_pair_method(w, seg(b"_PCT"), &FFH_PERF_CTL, &FFH_PERF_STATUS)
}

/// `_PPC`: no platform limit.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn ppc(w: &mut AmlWriter<'_>) -> Result<(), AmlError> {
    return_zero_method(w, seg(b"_PPC"))
}

/// `_PSD`: one dependency domain per socket.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn psd(w: &mut AmlWriter<'_>, domain: u32, coordination: PstateCoordination, count: u32) -> Result<(), AmlError> {
    dependency_method(w, seg(b"_PSD"), capability::PSD, domain, coordination as u32, count)
}

// ─── C-states ──────────────────────────────────────────────────────────────

fn cstate_package(w: &mut AmlWriter<'_>, cstates: &[Cstate]) -> Result<(), AmlError> {
    let count = cstates.len() as u8;
    let ret = w.return_package(count + 1)?;
    w.byte_const(count)?;
    for cstate in cstates {
        let pkg = w.small_package(4)?;
        w.register_buffer(&cstate.register)?;
        w.byte_const(cstate.kind)?;
        w.word_const(cstate.latency)?;
        w.dword_const(cstate.power)?;
        w.finish(pkg)?;
    }
    w.finish(ret)
}

/// `_CST`: the MWAIT table when the OS supports native C-states through
/// MWAIT, the I/O table otherwise.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn cst(w: &mut AmlWriter<'_>, mwait: &[Cstate], io: &[Cstate]) -> Result<(), AmlError> {
    let method = w.method(seg(b"_CST"), 0)?;
    let outer = w.if_op()?;
    w.name_seg(CSEN)?;

    let inner = w.if_op()?;
    w.op(opcode::LAND)?;
    w.name_seg(MWOS)?;
    type_test(w, |w| w.word_const(capability::MWAIT_CST))?;
    cstate_package(w, mwait)?;
    w.finish(inner)?;

    cstate_package(w, io)?;
    w.finish(outer)?;
    w.return_zero()?;
    w.finish(method)
}

/// `_CSD`: one hardware-coordinated dependency per C-state deeper than C1.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
#[cfg(feature = "csd")]
pub fn csd(w: &mut AmlWriter<'_>, domain: u32, count: u32, cstates: &[Cstate]) -> Result<(), AmlError> {
    let method = w.method(seg(b"_CSD"), 0)?;
    let if_len = w.if_op()?;
    type_test(w, |w| w.dword_const(capability::CSD))?;
    let ret = w.return_package(cstates.len().saturating_sub(1) as u8)?;
    for index in 1..cstates.len() as u32 {
        let pkg = w.small_package(6)?;
        w.byte_const(6)?;
        w.byte_const(0)?;
        w.dword_const(domain)?;
        w.dword_const(PstateCoordination::HwAll as u32)?;
        w.dword_const(count)?;
        w.dword_const(index)?;
        w.finish(pkg)?;
    }
    w.finish(ret)?;
    w.finish(if_len)?;
    w.return_zero()?;
    w.finish(method)
}

// ─── T-states ──────────────────────────────────────────────────────────────

/// `_TPC`: no throttling limit.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn tpc(w: &mut AmlWriter<'_>) -> Result<(), AmlError> {
    return_zero_method(w, seg(b"_TPC"))
}

/// `_PTC`: throttling through functional fixed hardware.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn ptc(w: &mut AmlWriter<'_>) -> Result<(), AmlError> {
    register_pair_method(w, seg(b"_PTC"), &FFH_EMPTY, &FFH_EMPTY)
}

/// `_TSS`, returning `tstates` while `TSEN` is set and the OS understands
/// it.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn tss(w: &mut AmlWriter<'_>, tstates: &[Tstate]) -> Result<(), AmlError> {
    let method = w.method(seg(b"_TSS"), 0)?;
    let if_len = w.if_op()?;
    w.op(opcode::LAND)?;
    w.name_seg(TSEN)?;
    type_test(w, |w| w.word_const(capability::TSS))?;
    let ret = w.return_package(tstates.len() as u8)?;
    for tstate in tstates {
        let pkg = w.small_package(5)?;
        w.dword_const(tstate.freq_percent)?;
        w.dword_const(tstate.power)?;
        w.dword_const(tstate.latency)?;
        w.dword_const(tstate.control)?;
        w.dword_const(tstate.status)?;
        w.finish(pkg)?;
    }
    w.finish(ret)?;
    w.finish(if_len)?;
    w.return_zero()?;
    w.finish(method)
}

/// `_TSD`: one software-coordinated domain per core.
///
/// # Errors
///
/// [`AmlError::SizeExceeded`] if the buffer is full.
pub fn tsd(w: &mut AmlWriter<'_>, domain: u32, count: u32) -> Result<(), AmlError> {
    dependency_method(
        w,
        seg(b"_TSD"),
        capability::TSD,
        domain,
        PstateCoordination::SwAny as u32,
        count,
    )
}
