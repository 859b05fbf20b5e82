//! Restricted AML recognizer.
//!
//! A recursive-descent walk over the subset of the AML grammar that firmware
//! tables use around processor declarations: namespace modifiers, named
//! objects, `If`/`Else`/`Return`, and the handful of expression opcodes that
//! appear in `_PDC`/`_OSC`/`_CST` style methods. Unknown bytes end the term
//! list they appear in; the caller learns about it through [`Unhandled`].
//!
//! Every production returns [`Parse::Matched`] with the offset just past
//! what it consumed, or [`Parse::NoMatch`] without consuming anything, so
//! alternation is simply "try the next production at the same offset".

use arrayvec::ArrayVec;

use super::opcode::{self, ext};
use super::path::{AmlPath, MAX_PATH_DEPTH, NameSeg, is_lead_char};
use crate::bytes::read_u32;

/// Capacity of the processor record table.
pub const PROCESSOR_LIMIT: usize = 256;

/// Deepest term-list nesting followed before a branch is abandoned.
const MAX_NESTING: usize = 64;

/// Outcome of one grammar production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parse {
    /// The production matched; parsing continues at this offset.
    Matched(usize),
    /// The production does not apply here. Nothing was consumed.
    NoMatch,
}

impl Parse {
    /// Try `f` when this production did not match.
    fn or_else(self, f: impl FnOnce() -> Self) -> Self {
        match self {
            Self::NoMatch => f(),
            matched => matched,
        }
    }

    /// Continue with `f` from the end of this match.
    fn and_then(self, f: impl FnOnce(usize) -> Self) -> Self {
        match self {
            Self::Matched(end) => f(end),
            Self::NoMatch => Self::NoMatch,
        }
    }

    /// Returns the end offset of a match.
    #[must_use]
    pub fn end(self) -> Option<usize> {
        match self {
            Self::Matched(end) => Some(end),
            Self::NoMatch => None,
        }
    }
}

/// A `Processor()` declaration found in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcpiProcessor {
    /// Absolute namespace path of the processor object.
    pub path: AmlPath,
    /// One-byte ACPI processor id.
    pub acpi_id: u8,
    /// Processor block (P_BLK) I/O address.
    pub pblk: u32,
}

/// The first byte a term list could not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unhandled {
    /// Offset from the start of the walked bytes.
    pub offset: usize,
    /// The byte found there.
    pub opcode: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watch {
    Off,
    Pending,
    Found,
}

/// Scan state carried across one or more table walks.
///
/// Processors accumulate across walks, so a DSDT walk followed by SSDT
/// walks checks each SSDT against everything declared before it.
#[derive(Debug)]
pub struct AmlScanner {
    processors: ArrayVec<AcpiProcessor, PROCESSOR_LIMIT>,
    dropped: usize,
    watch: Watch,
    unhandled: Option<Unhandled>,
}

impl Default for AmlScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl AmlScanner {
    /// Create a scanner with an empty processor table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            processors: ArrayVec::new(),
            dropped: 0,
            watch: Watch::Off,
            unhandled: None,
        }
    }

    /// Walk `aml` (a table body, without its SDT header), recording every
    /// processor declaration.
    ///
    /// # Errors
    ///
    /// Returns the first [`Unhandled`] byte that stopped any term list. The
    /// processors recorded before and after it are kept.
    pub fn walk(&mut self, aml: &[u8]) -> Result<(), Unhandled> {
        self.watch = Watch::Off;
        self.run(aml)
    }

    /// Walk `aml` and report whether any name in it resolves to a processor
    /// already in the table.
    pub fn references_processor(&mut self, aml: &[u8]) -> bool {
        self.watch = Watch::Pending;
        if let Err(stop) = self.run(aml) {
            log::debug!("AML walk stopped at {:#x} (opcode {:#04x})", stop.offset, stop.opcode);
        }
        let found = self.watch == Watch::Found;
        self.watch = Watch::Off;
        found
    }

    /// Processors recorded so far.
    #[must_use]
    pub fn processors(&self) -> &[AcpiProcessor] {
        &self.processors
    }

    /// Number of processor declarations dropped because the table was full.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn run(&mut self, aml: &[u8]) -> Result<(), Unhandled> {
        self.unhandled = None;
        let mut walker = Walker {
            aml,
            scanner: self,
            nesting: 0,
        };
        walker.term_list(&AmlPath::ROOT, 0, aml.len());
        self.unhandled.take().map_or(Ok(()), Err)
    }

    fn add_processor(&mut self, processor: AcpiProcessor) {
        if self.processors.try_push(processor).is_err() {
            self.dropped += 1;
            log::warn!("processor table full, dropping {}", processor.path);
        }
    }

    fn note_reference(&mut self, path: &AmlPath) {
        if self.watch == Watch::Pending && self.processors.iter().any(|p| p.path == *path) {
            self.watch = Watch::Found;
        }
    }
}

struct Walker<'a, 's> {
    aml: &'a [u8],
    scanner: &'s mut AmlScanner,
    nesting: usize,
}

impl Walker<'_, '_> {
    fn byte(&self, pos: usize) -> Option<u8> {
        self.aml.get(pos).copied()
    }

    /// Match ending at `end`, provided the bytes exist.
    fn to(&self, end: usize) -> Parse {
        if end <= self.aml.len() {
            Parse::Matched(end)
        } else {
            Parse::NoMatch
        }
    }

    // ─── PkgLength decoding ────────────────────────────────────────────────

    /// Decode the PkgLength at `pos` as `(length, encoded_bytes)`.
    ///
    /// The length counts the encoding itself.
    fn pkg_length(&self, pos: usize) -> Option<(usize, usize)> {
        let lead = self.byte(pos)?;
        let extra = usize::from(lead >> 6);
        if extra == 0 {
            return Some((usize::from(lead & 0x3F), 1));
        }
        let mut length = usize::from(lead & 0x0F);
        for i in 0..extra {
            length |= usize::from(self.byte(pos + 1 + i)?) << (4 + i * 8);
        }
        Some((length, extra + 1))
    }

    /// Returns `(content_start, end)` for the package whose PkgLength is at
    /// `pos`, if the package fits in the walked bytes.
    fn package_bounds(&self, pos: usize) -> Option<(usize, usize)> {
        let (length, encoded) = self.pkg_length(pos)?;
        let end = pos.checked_add(length)?;
        (end <= self.aml.len()).then_some((pos + encoded, end))
    }

    fn skip_package(&self, pkg_pos: usize) -> Parse {
        self.package_bounds(pkg_pos)
            .map_or(Parse::NoMatch, |(_, end)| Parse::Matched(end))
    }

    // ─── Name parsing ──────────────────────────────────────────────────────

    /// NameString: optional `\` or `^` prefixes, then a NullName, a single
    /// NameSeg, or a dual/multi name path, resolved against `ns`.
    fn name_string(&mut self, ns: &AmlPath, pos: usize, out: &mut AmlPath) -> Parse {
        let mut path = *ns;
        let mut cur = pos;

        match self.byte(cur) {
            Some(opcode::ROOT_CHAR) => {
                path = AmlPath::ROOT;
                cur += 1;
            }
            Some(opcode::PARENT_PREFIX_CHAR) => {
                while self.byte(cur) == Some(opcode::PARENT_PREFIX_CHAR) {
                    if path.pop().is_none() {
                        log::debug!("parent prefix above root at {pos:#x}");
                        return Parse::NoMatch;
                    }
                    cur += 1;
                }
            }
            _ => {}
        }

        let count = match self.byte(cur) {
            Some(opcode::DUAL_NAME_PREFIX) => {
                cur += 1;
                2
            }
            Some(opcode::MULTI_NAME_PREFIX) => {
                let Some(count) = self.byte(cur + 1) else {
                    return Parse::NoMatch;
                };
                cur += 2;
                usize::from(count)
            }
            Some(opcode::ZERO) => {
                cur += 1;
                0
            }
            Some(lead) if is_lead_char(lead) => 1,
            _ => return Parse::NoMatch,
        };

        if count > path.remaining() {
            log::warn!("name path at {pos:#x} deeper than {MAX_PATH_DEPTH} segments");
            return Parse::NoMatch;
        }
        for _ in 0..count {
            let Some(seg) = self.aml.get(cur..).and_then(NameSeg::from_bytes) else {
                return Parse::NoMatch;
            };
            path.push(seg);
            cur += 4;
        }

        if count > 0 {
            self.scanner.note_reference(&path);
        }
        *out = path;
        Parse::Matched(cur)
    }

    fn any_name(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        let mut scratch = AmlPath::ROOT;
        self.name_string(ns, pos, &mut scratch)
    }

    // ─── Data objects ──────────────────────────────────────────────────────

    fn computational_data(&self, pos: usize) -> Parse {
        match self.byte(pos) {
            Some(opcode::BYTE_PREFIX) => self.to(pos + 2),
            Some(opcode::WORD_PREFIX) => self.to(pos + 3),
            Some(opcode::DWORD_PREFIX) => self.to(pos + 5),
            Some(opcode::QWORD_PREFIX) => self.to(pos + 9),
            Some(opcode::STRING_PREFIX) => self
                .aml
                .get(pos + 1..)
                .and_then(|s| s.iter().position(|&b| b == 0))
                .map_or(Parse::NoMatch, |nul| Parse::Matched(pos + 1 + nul + 1)),
            Some(opcode::ZERO | opcode::ONE | opcode::ONES) => Parse::Matched(pos + 1),
            Some(opcode::EXT_OP_PREFIX) if self.byte(pos + 1) == Some(ext::REVISION) => {
                Parse::Matched(pos + 2)
            }
            Some(opcode::BUFFER) => self.skip_package(pos + 1),
            _ => Parse::NoMatch,
        }
    }

    fn data_object(&self, pos: usize) -> Parse {
        match self.byte(pos) {
            Some(opcode::PACKAGE | opcode::VAR_PACKAGE) => self.skip_package(pos + 1),
            _ => self.computational_data(pos),
        }
    }

    fn data_ref_object(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        self.data_object(pos).or_else(|| self.any_name(ns, pos))
    }

    fn arg_obj(&self, pos: usize) -> Parse {
        match self.byte(pos) {
            Some(opcode::ARG0..=opcode::ARG6) => Parse::Matched(pos + 1),
            _ => Parse::NoMatch,
        }
    }

    fn local_obj(&self, pos: usize) -> Parse {
        match self.byte(pos) {
            Some(opcode::LOCAL0..=opcode::LOCAL7) => Parse::Matched(pos + 1),
            _ => Parse::NoMatch,
        }
    }

    fn debug_obj(&self, pos: usize) -> Parse {
        if self.byte(pos) == Some(opcode::EXT_OP_PREFIX) && self.byte(pos + 1) == Some(ext::DEBUG) {
            Parse::Matched(pos + 2)
        } else {
            Parse::NoMatch
        }
    }

    // ─── Names as operands ─────────────────────────────────────────────────

    fn simple_name(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        self.any_name(ns, pos)
            .or_else(|| self.arg_obj(pos))
            .or_else(|| self.local_obj(pos))
    }

    fn super_name(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        self.simple_name(ns, pos)
            .or_else(|| self.debug_obj(pos))
            .or_else(|| self.reference_op(ns, pos))
    }

    /// Target is a SuperName or a NullName, which the name parser accepts.
    fn target(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        self.super_name(ns, pos)
    }

    /// `Index`, `RefOf`, `DerefOf`.
    fn reference_op(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        match self.byte(pos) {
            Some(opcode::INDEX) => self
                .term_args(ns, pos + 1, 2)
                .and_then(|c| self.target(ns, c)),
            Some(opcode::REF_OF) => self.super_name(ns, pos + 1),
            Some(opcode::DEREF_OF) => self.term_arg(ns, pos + 1),
            _ => Parse::NoMatch,
        }
    }

    // ─── Expressions ───────────────────────────────────────────────────────

    fn term_arg(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        self.type2(ns, pos, None)
            .or_else(|| self.data_object(pos))
            .or_else(|| self.arg_obj(pos))
            .or_else(|| self.local_obj(pos))
    }

    fn term_args(&mut self, ns: &AmlPath, pos: usize, count: usize) -> Parse {
        let mut cur = pos;
        for _ in 0..count {
            match self.term_arg(ns, cur) {
                Parse::Matched(next) => cur = next,
                Parse::NoMatch => return Parse::NoMatch,
            }
        }
        Parse::Matched(cur)
    }

    /// Greedily consume invocation arguments up to `end`.
    fn term_arg_list(&mut self, ns: &AmlPath, pos: usize, end: usize) -> usize {
        let mut cur = pos;
        while cur < end {
            match self.term_arg(ns, cur) {
                Parse::Matched(next) => cur = next,
                Parse::NoMatch => break,
            }
        }
        cur
    }

    /// Type 2 opcodes (expressions). A bare name is a method invocation; in
    /// statement position (`args_end` is set) it takes the arguments that
    /// follow, otherwise it is an object reference.
    fn type2(&mut self, ns: &AmlPath, pos: usize, args_end: Option<usize>) -> Parse {
        let Some(op) = self.byte(pos) else {
            return Parse::NoMatch;
        };
        match op {
            opcode::PACKAGE | opcode::VAR_PACKAGE => self.skip_package(pos + 1),
            opcode::LNOT => self.term_arg(ns, pos + 1),
            opcode::LAND | opcode::LOR | opcode::LEQUAL | opcode::LGREATER | opcode::LLESS => {
                self.term_args(ns, pos + 1, 2)
            }
            opcode::STORE => self
                .term_arg(ns, pos + 1)
                .and_then(|c| self.super_name(ns, c)),
            opcode::ADD
            | opcode::CONCAT
            | opcode::SUBTRACT
            | opcode::MULTIPLY
            | opcode::AND
            | opcode::OR => self
                .term_args(ns, pos + 1, 2)
                .and_then(|c| self.target(ns, c)),
            opcode::SIZE_OF => self.super_name(ns, pos + 1),
            opcode::INDEX | opcode::REF_OF | opcode::DEREF_OF => self.reference_op(ns, pos),
            opcode::CREATE_DWORD_FIELD => self
                .term_args(ns, pos + 1, 2)
                .and_then(|c| self.any_name(ns, c)),
            opcode::EXT_OP_PREFIX => match self.byte(pos + 1) {
                Some(ext::COND_REF_OF) => self
                    .super_name(ns, pos + 2)
                    .and_then(|c| self.target(ns, c)),
                Some(ext::CREATE_FIELD) => self
                    .term_args(ns, pos + 2, 3)
                    .and_then(|c| self.any_name(ns, c)),
                _ => Parse::NoMatch,
            },
            _ => match (self.any_name(ns, pos), args_end) {
                (Parse::Matched(c), Some(end)) => Parse::Matched(self.term_arg_list(ns, c, end)),
                (name, _) => name,
            },
        }
    }

    // ─── Statements ────────────────────────────────────────────────────────

    /// Type 1 opcodes (control flow).
    fn type1(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        match self.byte(pos) {
            Some(opcode::IF | opcode::WHILE) => {
                let Some((start, end)) = self.package_bounds(pos + 1) else {
                    return Parse::NoMatch;
                };
                if let Parse::Matched(body) = self.term_arg(ns, start) {
                    self.term_list(ns, body, end);
                }
                Parse::Matched(end)
            }
            Some(opcode::ELSE) => {
                let Some((start, end)) = self.package_bounds(pos + 1) else {
                    return Parse::NoMatch;
                };
                self.term_list(ns, start, end);
                Parse::Matched(end)
            }
            Some(opcode::RETURN) => self.term_arg(ns, pos + 1),
            Some(opcode::NOOP | opcode::BREAK | opcode::BREAK_POINT) => Parse::Matched(pos + 1),
            _ => Parse::NoMatch,
        }
    }

    /// `Scope`, `Name`, `Alias`.
    fn namespace_modifier(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        match self.byte(pos) {
            Some(opcode::SCOPE) => self.scoped(ns, pos + 1, 0, true),
            Some(opcode::NAME) => self
                .any_name(ns, pos + 1)
                .and_then(|c| self.data_ref_object(ns, c)),
            Some(opcode::ALIAS) => self
                .any_name(ns, pos + 1)
                .and_then(|c| self.any_name(ns, c)),
            _ => Parse::NoMatch,
        }
    }

    /// A package holding a name, `fixed` bytes of fixed fields, then a body:
    /// a term list when `terms` is set, an object list otherwise. Always
    /// matches through the package end once the PkgLength decodes.
    fn scoped(&mut self, ns: &AmlPath, pkg_pos: usize, fixed: usize, terms: bool) -> Parse {
        let Some((start, end)) = self.package_bounds(pkg_pos) else {
            return Parse::NoMatch;
        };
        let mut inner = AmlPath::ROOT;
        if let Parse::Matched(name_end) = self.name_string(ns, start, &mut inner) {
            if terms {
                self.term_list(&inner, name_end + fixed, end);
            } else {
                self.object_list(&inner, name_end + fixed, end);
            }
        }
        Parse::Matched(end)
    }

    fn method(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        // The flags byte follows the name.
        self.scoped(ns, pos + 1, 1, true)
    }

    fn processor(&mut self, ns: &AmlPath, pkg_pos: usize) -> Parse {
        let Some((start, end)) = self.package_bounds(pkg_pos) else {
            return Parse::NoMatch;
        };
        let mut path = AmlPath::ROOT;
        if let Parse::Matched(name_end) = self.name_string(ns, start, &mut path) {
            let id = self.byte(name_end);
            let pblk = read_u32(self.aml, name_end + 1);
            if let (Some(acpi_id), Some(pblk)) = (id, pblk) {
                self.scanner.add_processor(AcpiProcessor { path, acpi_id, pblk });
            }
            // ProcId, PblkAddr, PblkLen.
            self.object_list(&path, name_end + 6, end);
        }
        Parse::Matched(end)
    }

    /// Named objects: `Method` and the extended-opcode declarations.
    fn named_object(&mut self, ns: &AmlPath, pos: usize) -> Parse {
        match self.byte(pos) {
            Some(opcode::METHOD) => self.method(ns, pos),
            Some(opcode::EXT_OP_PREFIX) => match self.byte(pos + 1) {
                Some(ext::MUTEX) => self.any_name(ns, pos + 2).and_then(|c| self.to(c + 1)),
                Some(ext::EVENT) => self.any_name(ns, pos + 2),
                Some(ext::OP_REGION) => self
                    .any_name(ns, pos + 2)
                    .and_then(|c| self.term_args(ns, c + 1, 2)),
                Some(ext::FIELD | ext::INDEX_FIELD) => self.skip_package(pos + 2),
                Some(ext::DEVICE | ext::THERMAL_ZONE) => self.scoped(ns, pos + 2, 0, false),
                // SystemLevel, ResourceOrder.
                Some(ext::POWER_RES) => self.scoped(ns, pos + 2, 3, false),
                Some(ext::PROCESSOR) => self.processor(ns, pos + 2),
                _ => Parse::NoMatch,
            },
            _ => Parse::NoMatch,
        }
    }

    // ─── Lists ─────────────────────────────────────────────────────────────

    fn enter(&mut self, pos: usize) -> bool {
        if self.nesting >= MAX_NESTING {
            log::warn!("AML nesting deeper than {MAX_NESTING} at {pos:#x}");
            self.record_unhandled(pos);
            return false;
        }
        self.nesting += 1;
        true
    }

    fn term_list(&mut self, ns: &AmlPath, pos: usize, end: usize) {
        if !self.enter(pos) {
            return;
        }
        let end = end.min(self.aml.len());
        let mut cur = pos;
        while cur < end {
            let next = self
                .namespace_modifier(ns, cur)
                .or_else(|| self.named_object(ns, cur))
                .or_else(|| self.type1(ns, cur))
                .or_else(|| self.type2(ns, cur, Some(end)));
            match next {
                Parse::Matched(c) => cur = c,
                Parse::NoMatch => {
                    self.record_unhandled(cur);
                    break;
                }
            }
        }
        self.nesting -= 1;
    }

    fn object_list(&mut self, ns: &AmlPath, pos: usize, end: usize) {
        if !self.enter(pos) {
            return;
        }
        let end = end.min(self.aml.len());
        let mut cur = pos;
        while cur < end {
            match self
                .namespace_modifier(ns, cur)
                .or_else(|| self.named_object(ns, cur))
            {
                Parse::Matched(c) => cur = c,
                Parse::NoMatch => break,
            }
        }
        self.nesting -= 1;
    }

    fn record_unhandled(&mut self, pos: usize) {
        let opcode = self.byte(pos).unwrap_or(0);
        log::debug!("unhandled AML byte {opcode:#04x} at {pos:#x}");
        if self.scanner.unhandled.is_none() {
            self.scanner.unhandled = Some(Unhandled { offset: pos, opcode });
        }
    }
}
