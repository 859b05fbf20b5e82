//! Little-endian field access on raw table bytes.
//!
//! ACPI tables are byte-packed and little-endian. These helpers read and
//! write fixed-width fields at arbitrary offsets without any alignment
//! assumptions, returning `None` when the field would cross the end of the
//! slice.

/// Returns the byte range `offset..offset + N`, if it lies within `data`.
fn field<const N: usize>(data: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    data.get(offset..end)?.try_into().ok()
}

/// Returns a mutable view of `offset..offset + len`, if it lies within `data`.
fn field_mut(data: &mut [u8], offset: usize, len: usize) -> Option<&mut [u8]> {
    let end = offset.checked_add(len)?;
    data.get_mut(offset..end)
}

/// Reads a `u8` at `offset`.
#[must_use]
pub fn read_u8(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

/// Reads a little-endian `u16` at `offset`.
#[must_use]
pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    field(data, offset).map(u16::from_le_bytes)
}

/// Reads a little-endian `u32` at `offset`.
#[must_use]
pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    field(data, offset).map(u32::from_le_bytes)
}

/// Reads a little-endian `u64` at `offset`.
#[must_use]
pub fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    field(data, offset).map(u64::from_le_bytes)
}

/// Writes a `u8` at `offset`.
pub fn write_u8(data: &mut [u8], offset: usize, value: u8) -> Option<()> {
    *data.get_mut(offset)? = value;
    Some(())
}

/// Writes a little-endian `u16` at `offset`.
pub fn write_u16(data: &mut [u8], offset: usize, value: u16) -> Option<()> {
    field_mut(data, offset, 2)?.copy_from_slice(&value.to_le_bytes());
    Some(())
}

/// Writes a little-endian `u32` at `offset`.
pub fn write_u32(data: &mut [u8], offset: usize, value: u32) -> Option<()> {
    field_mut(data, offset, 4)?.copy_from_slice(&value.to_le_bytes());
    Some(())
}

/// Writes a little-endian `u64` at `offset`.
pub fn write_u64(data: &mut [u8], offset: usize, value: u64) -> Option<()> {
    field_mut(data, offset, 8)?.copy_from_slice(&value.to_le_bytes());
    Some(())
}
