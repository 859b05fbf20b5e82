//! Forward-only AML encoder.
//!
//! [`AmlWriter`] appends bytes into a caller-owned buffer and fails with
//! [`AmlError::SizeExceeded`] instead of writing past its end. Package
//! lengths are reserved up front as [`PkgLength`] placeholders and patched
//! once the package body is complete. The reserved width is fixed, so a
//! body that outgrows it fails with [`AmlError::PackageTooLong`].

use super::AmlError;
use super::opcode::{self, resource};
use super::path::NameSeg;
use crate::gas::GenericAddress;
use crate::sdt::{SdtHeader, set_checksum};

/// Largest length a one-byte PkgLength can hold.
pub const PKG_LENGTH_1_MAX: usize = 0x3F;
/// Largest length a two-byte PkgLength can hold.
pub const PKG_LENGTH_2_MAX: usize = 0xFFF;
/// Largest length a four-byte PkgLength can hold.
pub const PKG_LENGTH_4_MAX: usize = 0x0FFF_FFFF;

/// A reserved PkgLength field awaiting [`AmlWriter::finish`].
#[must_use = "a reserved package length must be finished"]
#[derive(Debug)]
pub struct PkgLength {
    offset: usize,
    width: u8,
}

/// A table header awaiting [`AmlWriter::finish_table`].
#[must_use = "a table header must be finished"]
#[derive(Debug)]
pub struct TableStart {
    offset: usize,
}

/// Appends AML into a fixed buffer.
#[derive(Debug)]
pub struct AmlWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> AmlWriter<'a> {
    /// Start writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The written prefix of the buffer.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    // ─── Raw bytes ─────────────────────────────────────────────────────────

    /// Append `data` verbatim.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if `data` does not fit. Nothing is written.
    pub fn bytes(&mut self, data: &[u8]) -> Result<(), AmlError> {
        let end = self.pos.checked_add(data.len()).ok_or(AmlError::SizeExceeded)?;
        let dst = self.buf.get_mut(self.pos..end).ok_or(AmlError::SizeExceeded)?;
        dst.copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    /// Append one opcode or raw byte.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn op(&mut self, op: u8) -> Result<(), AmlError> {
        self.bytes(&[op])
    }

    /// Append an extended opcode (`0x5B op`).
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn ext_op(&mut self, op: u8) -> Result<(), AmlError> {
        self.bytes(&[opcode::EXT_OP_PREFIX, op])
    }

    /// Append a bare name segment.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn name_seg(&mut self, seg: NameSeg) -> Result<(), AmlError> {
        self.bytes(&seg.0)
    }

    /// Append a name path. A rooted path starts with `\`; two segments use
    /// the dual-name prefix, more use the multi-name prefix.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn name_path(&mut self, rooted: bool, segs: &[NameSeg]) -> Result<(), AmlError> {
        if rooted {
            self.op(opcode::ROOT_CHAR)?;
        }
        match segs.len() {
            0 => self.op(opcode::ZERO)?,
            1 => {}
            2 => self.op(opcode::DUAL_NAME_PREFIX)?,
            n => {
                let count = u8::try_from(n).map_err(|_| AmlError::PackageTooLong(n))?;
                self.bytes(&[opcode::MULTI_NAME_PREFIX, count])?;
            }
        }
        segs.iter().try_for_each(|&seg| self.name_seg(seg))
    }

    // ─── Constants ─────────────────────────────────────────────────────────

    /// `ByteConst`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn byte_const(&mut self, value: u8) -> Result<(), AmlError> {
        self.bytes(&[opcode::BYTE_PREFIX, value])
    }

    /// `WordConst`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn word_const(&mut self, value: u16) -> Result<(), AmlError> {
        let [a, b] = value.to_le_bytes();
        self.bytes(&[opcode::WORD_PREFIX, a, b])
    }

    /// `DWordConst`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn dword_const(&mut self, value: u32) -> Result<(), AmlError> {
        let [a, b, c, d] = value.to_le_bytes();
        self.bytes(&[opcode::DWORD_PREFIX, a, b, c, d])
    }

    /// `Zero`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn zero(&mut self) -> Result<(), AmlError> {
        self.op(opcode::ZERO)
    }

    // ─── Package lengths ───────────────────────────────────────────────────

    fn reserve(&mut self, width: u8) -> Result<PkgLength, AmlError> {
        let offset = self.pos;
        self.bytes(&[0; 4][..usize::from(width)])?;
        Ok(PkgLength { offset, width })
    }

    /// Reserve a two-byte PkgLength (bodies up to 4 KiB).
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn pkg_length(&mut self) -> Result<PkgLength, AmlError> {
        self.reserve(2)
    }

    /// Reserve a one-byte PkgLength (bodies up to 63 bytes).
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn small_pkg_length(&mut self) -> Result<PkgLength, AmlError> {
        self.reserve(1)
    }

    /// Reserve a four-byte PkgLength (bodies up to 256 MiB).
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn wide_pkg_length(&mut self) -> Result<PkgLength, AmlError> {
        self.reserve(4)
    }

    /// Patch `slot` with the length from its first byte to the current
    /// position.
    ///
    /// # Errors
    ///
    /// [`AmlError::PackageTooLong`] if the length does not fit the width
    /// reserved for it.
    pub fn finish(&mut self, slot: PkgLength) -> Result<(), AmlError> {
        let len = self.pos - slot.offset;
        let max = match slot.width {
            1 => PKG_LENGTH_1_MAX,
            2 => PKG_LENGTH_2_MAX,
            _ => PKG_LENGTH_4_MAX,
        };
        if len > max {
            return Err(AmlError::PackageTooLong(len));
        }
        let field = &mut self.buf[slot.offset..slot.offset + usize::from(slot.width)];
        if slot.width == 1 {
            field[0] = len as u8;
            return Ok(());
        }
        // Lead byte: follow-byte count, then the low nibble of the length.
        field[0] = ((slot.width - 1) << 6) | (len & 0x0F) as u8;
        for (i, byte) in field[1..].iter_mut().enumerate() {
            *byte = (len >> (4 + 8 * i)) as u8;
        }
        Ok(())
    }

    // ─── Structure ─────────────────────────────────────────────────────────

    /// Open `Scope(<path>)`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn scope(&mut self, rooted: bool, segs: &[NameSeg]) -> Result<PkgLength, AmlError> {
        self.op(opcode::SCOPE)?;
        let len = self.pkg_length()?;
        self.name_path(rooted, segs)?;
        Ok(len)
    }

    /// Open `Method(name, flags)` with a two-byte PkgLength.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn method(&mut self, name: NameSeg, flags: u8) -> Result<PkgLength, AmlError> {
        self.op(opcode::METHOD)?;
        let len = self.pkg_length()?;
        self.name_seg(name)?;
        self.op(flags)?;
        Ok(len)
    }

    /// Open `Method(name, flags)` with a one-byte PkgLength.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn small_method(&mut self, name: NameSeg, flags: u8) -> Result<PkgLength, AmlError> {
        self.op(opcode::METHOD)?;
        let len = self.small_pkg_length()?;
        self.name_seg(name)?;
        self.op(flags)?;
        Ok(len)
    }

    /// Open `If(...)`. The predicate is written next.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn if_op(&mut self) -> Result<PkgLength, AmlError> {
        self.op(opcode::IF)?;
        self.pkg_length()
    }

    /// `Name(name, value)` holding a `DWordConst`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn named_dword(&mut self, name: NameSeg, value: u32) -> Result<(), AmlError> {
        self.op(opcode::NAME)?;
        self.name_seg(name)?;
        self.dword_const(value)
    }

    /// `Return(Zero)`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn return_zero(&mut self) -> Result<(), AmlError> {
        self.bytes(&[opcode::RETURN, opcode::ZERO])
    }

    /// `Return(<single-byte operand>)`, e.g. an `ArgN` or `LocalN`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn return_op(&mut self, operand: u8) -> Result<(), AmlError> {
        self.bytes(&[opcode::RETURN, operand])
    }

    /// Open `Package(count)` with a two-byte PkgLength.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn package(&mut self, count: u8) -> Result<PkgLength, AmlError> {
        self.op(opcode::PACKAGE)?;
        let len = self.pkg_length()?;
        self.op(count)?;
        Ok(len)
    }

    /// Open `Return(Package(count))`.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn return_package(&mut self, count: u8) -> Result<PkgLength, AmlError> {
        self.op(opcode::RETURN)?;
        self.package(count)
    }

    /// Open `Package(count)` with a one-byte PkgLength.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn small_package(&mut self, count: u8) -> Result<PkgLength, AmlError> {
        self.op(opcode::PACKAGE)?;
        let len = self.small_pkg_length()?;
        self.op(count)?;
        Ok(len)
    }

    /// Open `Buffer()` with a one-byte PkgLength. The size operand and
    /// contents are written next.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn small_buffer(&mut self) -> Result<PkgLength, AmlError> {
        self.op(opcode::BUFFER)?;
        self.small_pkg_length()
    }

    /// `ResourceTemplate() { Register(...) }`: a buffer holding one Generic
    /// Register descriptor and an end tag.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the buffer is full.
    pub fn register_buffer(&mut self, gas: &GenericAddress) -> Result<(), AmlError> {
        // Descriptor (3 + 12) and end tag (2).
        const CONTENT: u8 = 3 + GenericAddress::SIZE as u8 + 2;

        let len = self.small_buffer()?;
        self.byte_const(CONTENT)?;
        self.bytes(&[resource::GENERIC_REGISTER, GenericAddress::SIZE as u8, 0])?;
        self.bytes(&gas.to_bytes())?;
        self.bytes(&[resource::END_TAG, 0])?;
        self.finish(len)
    }

    // ─── Tables ────────────────────────────────────────────────────────────

    /// Write `header` with zero length and checksum.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the header does not fit.
    pub fn table_header(&mut self, header: &SdtHeader) -> Result<TableStart, AmlError> {
        let offset = self.pos;
        let mut raw = [0u8; SdtHeader::SIZE];
        let blank = SdtHeader {
            length: 0,
            checksum: 0,
            ..*header
        };
        blank.write_to(&mut raw).ok_or(AmlError::SizeExceeded)?;
        self.bytes(&raw)?;
        Ok(TableStart { offset })
    }

    /// Patch the table length and checksum and return the finished table.
    ///
    /// # Errors
    ///
    /// [`AmlError::SizeExceeded`] if the table length does not fit its
    /// 32-bit field.
    pub fn finish_table(&mut self, start: TableStart) -> Result<&[u8], AmlError> {
        let table = &mut self.buf[start.offset..self.pos];
        let length = u32::try_from(table.len()).map_err(|_| AmlError::SizeExceeded)?;
        table[SdtHeader::LENGTH_OFFSET..SdtHeader::LENGTH_OFFSET + 4]
            .copy_from_slice(&length.to_le_bytes());
        set_checksum(table).map_err(|_| AmlError::SizeExceeded)?;
        Ok(table)
    }
}
