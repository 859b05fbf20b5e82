//! A heap-backed stand-in for physical memory.
//!
//! [`TestMemory`] implements [`AcpiHandler`] over a leaked byte buffer so
//! table discovery and patching can run on a host. It also knows how to lay
//! out the handful of tables those tests need.

extern crate std;

use std::boxed::Box;
use std::vec;

use crate::sdt::{SdtHeader, set_checksum, set_checksum_at};
use crate::AcpiHandler;

/// A flat, zero-initialized physical address space starting at `base`.
pub struct TestMemory {
    base: u64,
    mem: *mut u8,
    len: usize,
}

impl TestMemory {
    /// Create `len` bytes of zeroed memory mapped at physical `base`.
    #[must_use]
    pub fn new(base: u64, len: usize) -> Self {
        let mem = Box::leak(vec![0u8; len].into_boxed_slice()).as_mut_ptr();
        Self { base, mem, len }
    }

    /// The first 2 MiB of physical memory: BIOS windows plus room for tables
    /// at `0x10_0000` and up.
    #[must_use]
    pub fn low_memory() -> Self {
        Self::new(0, 0x20_0000)
    }

    fn offset(&self, phys: u64, size: usize) -> usize {
        let start = phys
            .checked_sub(self.base)
            .and_then(|off| usize::try_from(off).ok())
            .unwrap_or(usize::MAX);
        assert!(
            start.checked_add(size).is_some_and(|end| end <= self.len),
            "access {phys:#x}+{size:#x} outside test memory"
        );
        start
    }

    /// Returns a copy-free view of `len` bytes at `phys`.
    #[must_use]
    pub fn bytes(&self, phys: u64, len: usize) -> &'static [u8] {
        // SAFETY: Bounds are checked by `offset`; the buffer is leaked.
        unsafe { self.map_physical_region(phys, len) }
    }

    /// Returns the full table at `phys`, sized by its header.
    #[must_use]
    pub fn table(&self, phys: u64) -> &'static [u8] {
        let len = self.read_u32(phys + 4) as usize;
        self.bytes(phys, len)
    }

    /// Copy `data` to `phys`.
    pub fn write_bytes(&self, phys: u64, data: &[u8]) {
        // SAFETY: Bounds are checked by `offset`; tests are single-threaded.
        unsafe { self.map_physical_region_mut(phys, data.len()) }.copy_from_slice(data);
    }

    /// Read a byte.
    #[must_use]
    pub fn read_u8(&self, phys: u64) -> u8 {
        self.bytes(phys, 1)[0]
    }

    /// Read a little-endian `u16`.
    #[must_use]
    pub fn read_u16(&self, phys: u64) -> u16 {
        crate::bytes::read_u16(self.bytes(phys, 2), 0).unwrap_or_default()
    }

    /// Read a little-endian `u32`.
    #[must_use]
    pub fn read_u32(&self, phys: u64) -> u32 {
        crate::bytes::read_u32(self.bytes(phys, 4), 0).unwrap_or_default()
    }

    /// Read a little-endian `u64`.
    #[must_use]
    pub fn read_u64(&self, phys: u64) -> u64 {
        crate::bytes::read_u64(self.bytes(phys, 8), 0).unwrap_or_default()
    }

    /// Write a byte.
    pub fn write_u8(&self, phys: u64, value: u8) {
        self.write_bytes(phys, &[value]);
    }

    /// Write a little-endian `u16`.
    pub fn write_u16(&self, phys: u64, value: u16) {
        self.write_bytes(phys, &value.to_le_bytes());
    }

    /// Write a little-endian `u32`.
    pub fn write_u32(&self, phys: u64, value: u32) {
        self.write_bytes(phys, &value.to_le_bytes());
    }

    /// Place a table with a standard header and `body` at `phys`, checksummed.
    pub fn put_table(&self, phys: u64, signature: &[u8; 4], revision: u8, body: &[u8]) {
        let len = SdtHeader::SIZE + body.len();
        let header = SdtHeader {
            signature: *signature,
            length: u32::try_from(len).unwrap_or(u32::MAX),
            revision,
            checksum: 0,
            oem_id: *b"PMRC  ",
            oem_table_id: *b"TESTTBL ",
            oem_revision: 1,
            creator_id: *b"TEST",
            creator_revision: 1,
        };
        // SAFETY: Bounds are checked by `offset`.
        let table = unsafe { self.map_physical_region_mut(phys, len) };
        let _ = header.write_to(table);
        table[SdtHeader::SIZE..].copy_from_slice(body);
        let _ = set_checksum(table);
    }

    /// Place an RSDT (`is_xsdt == false`) or XSDT listing `entries`.
    pub fn put_root(&self, phys: u64, is_xsdt: bool, entries: &[u64]) {
        let mut body = std::vec::Vec::new();
        for &entry in entries {
            if is_xsdt {
                body.extend_from_slice(&entry.to_le_bytes());
            } else {
                body.extend_from_slice(&u32::try_from(entry).unwrap_or(0).to_le_bytes());
            }
        }
        let signature = if is_xsdt { b"XSDT" } else { b"RSDT" };
        self.put_table(phys, signature, 1, &body);
    }

    /// Place a FADT of the given revision pointing at `facs` and `dsdt`.
    pub fn put_fadt(&self, phys: u64, revision: u8, facs: u32, dsdt: u32) {
        let len = if revision >= 3 { 244 } else { 116 };
        let mut body = vec![0u8; len - SdtHeader::SIZE];
        body[0..4].copy_from_slice(&facs.to_le_bytes());
        body[4..8].copy_from_slice(&dsdt.to_le_bytes());
        self.put_table(phys, b"FACP", revision, &body);
    }

    /// Place a minimal 64-byte FACS.
    pub fn put_facs(&self, phys: u64) {
        self.write_bytes(phys, b"FACS");
        self.write_u32(phys + 4, 64);
    }

    /// Place an RSDP. Revision 2 structures carry the XSDT address and an
    /// extended checksum.
    pub fn put_rsdp(&self, phys: u64, revision: u8, rsdt: u32, xsdt: Option<u64>) {
        let mut rsdp = [0u8; 36];
        rsdp[0..8].copy_from_slice(crate::rsdp::RSDP_SIGNATURE);
        rsdp[9..15].copy_from_slice(b"PMRC  ");
        rsdp[15] = revision;
        rsdp[16..20].copy_from_slice(&rsdt.to_le_bytes());
        if revision >= 2 {
            rsdp[20..24].copy_from_slice(&36u32.to_le_bytes());
            rsdp[24..32].copy_from_slice(&xsdt.unwrap_or(0).to_le_bytes());
        }
        let _ = set_checksum_at(&mut rsdp[..20], 8);
        if revision >= 2 {
            let _ = set_checksum_at(&mut rsdp, 32);
        }
        self.write_bytes(phys, &rsdp);
    }
}

// SAFETY: Every mapping is bounds-checked against the leaked buffer, which
// lives for the rest of the process.
unsafe impl AcpiHandler for TestMemory {
    unsafe fn map_physical_region(&self, phys: u64, size: usize) -> &'static [u8] {
        let off = self.offset(phys, size);
        // SAFETY: `off..off + size` is inside the leaked allocation.
        unsafe { core::slice::from_raw_parts(self.mem.add(off), size) }
    }

    unsafe fn map_physical_region_mut(&self, phys: u64, size: usize) -> &'static mut [u8] {
        let off = self.offset(phys, size);
        // SAFETY: `off..off + size` is inside the leaked allocation.
        unsafe { core::slice::from_raw_parts_mut(self.mem.add(off), size) }
    }
}
