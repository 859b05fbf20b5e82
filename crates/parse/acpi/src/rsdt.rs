//! RSDT / XSDT table enumeration and editing.
//!
//! The Root System Description Table (RSDT, 32-bit entries) and its 64-bit
//! counterpart (XSDT) contain pointers to all other ACPI tables. This module
//! provides an iterator over those entries, a helper to locate a table by
//! its 4-byte signature, and the edits needed to link a new table in.

use crate::bytes::{read_u32, read_u64, write_u32, write_u64};
use crate::sdt::{self, SdtHeader};
use crate::{AcpiError, AcpiHandler};

/// RSDT signature.
pub const RSDT_SIGNATURE: &[u8; 4] = b"RSDT";

/// XSDT signature.
pub const XSDT_SIGNATURE: &[u8; 4] = b"XSDT";

/// Size in bytes of a single table-pointer entry in the RSDT (32-bit).
pub const RSDT_ENTRY_SIZE: usize = 4;

/// Size in bytes of a single table-pointer entry in the XSDT (64-bit).
pub const XSDT_ENTRY_SIZE: usize = 8;

const fn entry_size(is_xsdt: bool) -> usize {
    if is_xsdt { XSDT_ENTRY_SIZE } else { RSDT_ENTRY_SIZE }
}

/// Iterator over table entry physical addresses in an RSDT or XSDT.
pub struct RsdtIterator<'a> {
    /// Byte slice covering all entries.
    data: &'a [u8],
    /// Current offset (in bytes) from the start of `data`.
    offset: usize,
    /// Size of each entry: 4 for RSDT, 8 for XSDT.
    entry_size: usize,
}

impl<'a> RsdtIterator<'a> {
    /// Create a new iterator over the entries of an RSDT or XSDT.
    #[must_use]
    pub fn new(data: &'a [u8], is_xsdt: bool) -> Self {
        Self {
            data,
            offset: 0,
            entry_size: entry_size(is_xsdt),
        }
    }
}

impl Iterator for RsdtIterator<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + self.entry_size > self.data.len() {
            return None;
        }

        let addr = if self.entry_size == XSDT_ENTRY_SIZE {
            read_u64(self.data, self.offset)?
        } else {
            u64::from(read_u32(self.data, self.offset)?)
        };
        self.offset += self.entry_size;
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() - self.offset) / self.entry_size;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RsdtIterator<'_> {}

/// Returns an iterator over the entries of the root table at `root`.
///
/// A root table whose header cannot be read yields no entries.
#[must_use]
pub fn entries(handler: &impl AcpiHandler, root: u64, is_xsdt: bool) -> RsdtIterator<'static> {
    let total_len = sdt::read_header(handler, root).map_or(0, |h| h.length() as usize);
    if total_len <= SdtHeader::SIZE {
        return RsdtIterator::new(&[], is_xsdt);
    }
    // SAFETY: caller provides a valid physical address, total_len is from the header.
    let table_data = unsafe { handler.map_physical_region(root, total_len) };
    RsdtIterator::new(&table_data[SdtHeader::SIZE..], is_xsdt)
}

/// Search the RSDT/XSDT for a table whose signature matches and whose
/// checksum is valid.
///
/// Returns the physical address of the first such table, or `None`.
#[must_use]
pub fn find_valid_table(
    handler: &impl AcpiHandler,
    root: u64,
    is_xsdt: bool,
    signature: &[u8; 4],
) -> Option<u64> {
    entries(handler, root, is_xsdt)
        .filter(|&phys| phys != 0)
        .find(|&phys| sdt::load_table(handler, phys, signature).is_ok())
}

/// Append `table` to the root table at `root` in place.
///
/// The memory directly after the root table must be free for one more entry;
/// the length field grows by one entry and the checksum is recomputed.
///
/// # Errors
///
/// Returns [`AcpiError::AddressOutOfRange`] if `table` does not fit an RSDT
/// entry, or [`AcpiError::TruncatedData`] if the root header is unreadable.
pub fn append_entry(
    handler: &impl AcpiHandler,
    root: u64,
    is_xsdt: bool,
    table: u64,
) -> Result<(), AcpiError> {
    let size = entry_size(is_xsdt);
    let old_len = sdt::read_header(handler, root)?.length() as usize;
    let new_len = old_len + size;
    let new_len_field = u32::try_from(new_len).map_err(|_| AcpiError::AddressOutOfRange)?;

    // SAFETY: The caller guarantees the slot after the table is available.
    let data = unsafe { handler.map_physical_region_mut(root, new_len) };
    write_entry(data, old_len, is_xsdt, table)?;
    write_u32(data, SdtHeader::LENGTH_OFFSET, new_len_field).ok_or(AcpiError::TruncatedData)?;
    sdt::set_checksum(data)
}

/// Copy the RSDT at `old` to `new`, then append `table` to the copy.
///
/// The two regions may overlap. The RSDP is not touched; callers point it at
/// `new` afterwards.
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`] if the RSDT header is unreadable or
/// [`AcpiError::AddressOutOfRange`] if the regions cannot be addressed.
pub fn relocate_and_append(
    handler: &impl AcpiHandler,
    old: u64,
    new: u64,
    table: u32,
) -> Result<(), AcpiError> {
    let old_len = sdt::read_header(handler, old)?.length() as usize;
    let new_len = old_len + RSDT_ENTRY_SIZE;
    let old_end = old + old_len as u64;
    let new_end = new + new_len as u64;

    let start = old.min(new);
    let span = usize::try_from(old_end.max(new_end) - start).map_err(|_| AcpiError::AddressOutOfRange)?;
    let src = usize::try_from(old - start).map_err(|_| AcpiError::AddressOutOfRange)?;
    let dst = usize::try_from(new - start).map_err(|_| AcpiError::AddressOutOfRange)?;

    // SAFETY: The caller owns both the old and new locations; a single
    // mapping covers both so the copy may overlap.
    let region = unsafe { handler.map_physical_region_mut(start, span) };
    region.copy_within(src..src + old_len, dst);

    let data = &mut region[dst..dst + new_len];
    write_entry(data, old_len, false, u64::from(table))?;
    let new_len_field = u32::try_from(new_len).map_err(|_| AcpiError::AddressOutOfRange)?;
    write_u32(data, SdtHeader::LENGTH_OFFSET, new_len_field).ok_or(AcpiError::TruncatedData)?;
    sdt::set_checksum(data)
}

/// Overwrite entry `index` of the root table with `table`.
///
/// The checksum is left stale; call [`refresh_checksum`] after the last edit.
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`] if `index` is past the last entry.
pub fn set_entry(
    handler: &impl AcpiHandler,
    root: u64,
    is_xsdt: bool,
    index: usize,
    table: u64,
) -> Result<(), AcpiError> {
    let len = sdt::read_header(handler, root)?.length() as usize;
    // SAFETY: The table is `len` bytes long per its own header.
    let data = unsafe { handler.map_physical_region_mut(root, len) };
    let offset = SdtHeader::SIZE + index * entry_size(is_xsdt);
    if offset + entry_size(is_xsdt) > len {
        return Err(AcpiError::TruncatedData);
    }
    write_entry(data, offset, is_xsdt, table)
}

/// Recompute the checksum of the table at `phys` from its header length.
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`] if the header is unreadable.
pub fn refresh_checksum(handler: &impl AcpiHandler, phys: u64) -> Result<(), AcpiError> {
    let len = sdt::read_header(handler, phys)?.length() as usize;
    // SAFETY: The table is `len` bytes long per its own header.
    let data = unsafe { handler.map_physical_region_mut(phys, len) };
    sdt::set_checksum(data)
}

fn write_entry(data: &mut [u8], offset: usize, is_xsdt: bool, table: u64) -> Result<(), AcpiError> {
    let written = if is_xsdt {
        write_u64(data, offset, table)
    } else {
        let table = u32::try_from(table).map_err(|_| AcpiError::AddressOutOfRange)?;
        write_u32(data, offset, table)
    };
    written.ok_or(AcpiError::TruncatedData)
}
