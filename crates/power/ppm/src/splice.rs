//! Placing the generated SSDT and linking it into the root tables.
//!
//! [`PlatformHost::process_ssdt`] is the orchestration stage. The
//! [`ConflictPass`] is run separately, once the DSDT processors are known,
//! to retire older SSDTs that declare objects in the same processor scopes.

use pmrc_acpi::aml::AmlScanner;
use pmrc_acpi::rsdt::{self, RSDT_ENTRY_SIZE};
use pmrc_acpi::{AcpiError, AcpiHandler, AcpiTables, Rsdp, sdt};

use crate::exit::ExitCode;
use crate::host::PlatformHost;
use crate::options::SsdtLocation;
use crate::ssdt::{PLACEHOLDER_TABLE_ID, SSDT_BUFFER_SIZE, SSDT_SIGNATURE, build_ssdt};

fn linkage(err: AcpiError) -> ExitCode {
    log::error!("SSDT linkage: {err}");
    ExitCode::BuildSsdt
}

impl PlatformHost<'_> {
    /// Build the SSDT and link it as the placement policy asks.
    ///
    /// Nothing is built when every feature ended disabled, unless creation
    /// is forced. A failure records its cause before returning.
    ///
    /// # Errors
    ///
    /// [`ExitCode::BuildSsdt`] if the placement flag is invalid, the caller
    /// region is unusable, the table does not fit, or the root tables cannot
    /// be updated.
    pub fn process_ssdt(&mut self, handler: &impl AcpiHandler) -> Result<(), ExitCode> {
        let any_enabled = self.pstates_enabled || self.cstates_enabled || self.tstates_enabled;
        if !any_enabled && !self.options.ssdt_force_creation {
            log::info!("no power features enabled, SSDT not created");
            self.record(ExitCode::NoSsdtCreated);
            return Ok(());
        }

        let location = self.options.ssdt_location().map_err(|code| self.build_failure(code))?;
        let (addr, len) = match location {
            SsdtLocation::Reclaim => self.place_reclaimed(handler)?,
            SsdtLocation::AddressProvided => {
                let (addr, len) = self.place_at_caller_address(handler)?;
                let new_rsdt = self
                    .tables
                    .rsdt
                    .checked_sub(RSDT_ENTRY_SIZE as u64)
                    .ok_or(ExitCode::BuildSsdt)?;
                self.relocate_rsdt(handler, new_rsdt, addr)?;
                (addr, len)
            }
            SsdtLocation::AddressProvidedNoInsert => self.place_at_caller_address(handler)?,
            SsdtLocation::AddressProvidedInsert => {
                let (addr, len) = self.place_at_caller_address(handler)?;
                rsdt::append_entry(handler, self.tables.rsdt, false, addr).map_err(linkage)?;
                if let Some(xsdt) = self.tables.xsdt {
                    rsdt::append_entry(handler, xsdt, true, addr).map_err(linkage)?;
                }
                (addr, len)
            }
        };

        let exit = &mut self.options.exit_state;
        exit.ssdt_mem_addr = u32::try_from(addr).map_err(|_| ExitCode::BuildSsdt)?;
        exit.ssdt_mem_size = u32::try_from(len).map_err(|_| ExitCode::BuildSsdt)?;
        self.tables.ssdt = Some(addr);
        log::info!("SSDT at {addr:#x}, {len} bytes ({location:?})");
        Ok(())
    }

    fn build_failure(&mut self, cause: ExitCode) -> ExitCode {
        self.record(cause);
        ExitCode::BuildSsdt
    }

    fn build_into(&mut self, buf: &mut [u8]) -> Result<usize, ExitCode> {
        let built = build_ssdt(self, buf);
        built.map_err(|cause| self.build_failure(cause))
    }

    /// Build into a scratch buffer, slide the RSDT down by the table size
    /// plus one entry, and place the SSDT in the freed space above it.
    fn place_reclaimed(&mut self, handler: &impl AcpiHandler) -> Result<(u64, usize), ExitCode> {
        let mut scratch = [0u8; SSDT_BUFFER_SIZE];
        let len = self.build_into(&mut scratch)?;

        let old_rsdt = self.tables.rsdt;
        let rsdt_len = sdt::read_header(handler, old_rsdt).map_err(linkage)?.length();
        let new_rsdt = old_rsdt
            .checked_sub((RSDT_ENTRY_SIZE + len) as u64)
            .ok_or(ExitCode::BuildSsdt)?;
        let addr = new_rsdt + u64::from(rsdt_len) + RSDT_ENTRY_SIZE as u64;
        self.relocate_rsdt(handler, new_rsdt, addr)?;

        // SAFETY: The region ends where the old RSDT ended; the firmware
        // reserved everything below the RSDT for reclaim.
        let dest = unsafe { handler.map_physical_region_mut(addr, len) };
        dest.copy_from_slice(&scratch[..len]);
        Ok((addr, len))
    }

    fn place_at_caller_address(&mut self, handler: &impl AcpiHandler) -> Result<(u64, usize), ExitCode> {
        let addr = u64::from(self.options.ssdt_mem_addr);
        let size = self.options.ssdt_mem_size as usize;
        if addr == 0 {
            return Err(self.build_failure(ExitCode::InvalidSsdtAddr));
        }
        // SAFETY: The caller handed over `size` bytes at `addr` for the SSDT.
        let region = unsafe { handler.map_physical_region_mut(addr, size) };
        let len = self.build_into(region)?;
        Ok((addr, len))
    }

    /// Copy the RSDT to `new_rsdt` with `ssdt` appended, and point the RSDP
    /// at the copy.
    fn relocate_rsdt(&mut self, handler: &impl AcpiHandler, new_rsdt: u64, ssdt: u64) -> Result<(), ExitCode> {
        let entry = u32::try_from(ssdt).map_err(|_| ExitCode::BuildSsdt)?;
        let rsdt_field = u32::try_from(new_rsdt).map_err(|_| ExitCode::BuildSsdt)?;
        rsdt::relocate_and_append(handler, self.tables.rsdt, new_rsdt, entry).map_err(linkage)?;
        Rsdp::parse(handler, self.tables.rsdp)
            .and_then(|mut rsdp| rsdp.set_rsdt_address(handler, rsdt_field))
            .map_err(linkage)?;
        log::debug!("RSDT moved {:#x} -> {new_rsdt:#x}", self.tables.rsdt);
        self.tables.rsdt = new_rsdt;
        Ok(())
    }
}

// ─── Conflict pass ─────────────────────────────────────────────────────────

/// Retires pre-existing SSDTs that declare objects in processor scopes.
///
/// A table conflicts when its AML names a processor the scanner recorded
/// from the DSDT. Root table slots cannot shrink, so conflicting slots are
/// pointed at a header-only placeholder instead of being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictPass {
    /// The generated SSDT.
    pub new_ssdt: u64,
    /// A placeholder built by [`placeholder_ssdt`](crate::ssdt::placeholder_ssdt).
    pub placeholder: u64,
    /// The generated SSDT was already appended to the root tables.
    pub inserted: bool,
}

impl ConflictPass {
    /// Neutralize conflicting SSDTs in the RSDT and then the XSDT.
    ///
    /// With `inserted`, the final slot is the generated SSDT and every other
    /// match becomes the placeholder. Otherwise the first match is reused
    /// for the generated SSDT, later matches become the placeholder, and the
    /// SSDT is appended if nothing matched.
    ///
    /// # Errors
    ///
    /// Propagates failures to rewrite a root table.
    pub fn resolve(
        &self,
        handler: &impl AcpiHandler,
        tables: &AcpiTables,
        scanner: &mut AmlScanner,
    ) -> Result<(), AcpiError> {
        self.resolve_root(handler, tables.rsdt, false, scanner)?;
        if let Some(xsdt) = tables.xsdt {
            self.resolve_root(handler, xsdt, true, scanner)?;
        }
        Ok(())
    }

    fn resolve_root(
        &self,
        handler: &impl AcpiHandler,
        root: u64,
        is_xsdt: bool,
        scanner: &mut AmlScanner,
    ) -> Result<(), AcpiError> {
        let count = rsdt::entries(handler, root, is_xsdt).len();
        let mut linked = self.inserted;

        for index in 0..count {
            let Some(phys) = rsdt::entries(handler, root, is_xsdt).nth(index) else {
                break;
            };
            if phys == 0 {
                continue;
            }
            if phys > u64::from(u32::MAX) {
                log::warn!("skipping root table entry {index} above 4 GiB ({phys:#x})");
                continue;
            }
            if !self.conflicts(handler, phys, scanner) {
                continue;
            }

            let replacement = if self.inserted {
                if index + 1 == count {
                    if phys != self.new_ssdt {
                        log::warn!("last root table slot holds {phys:#x}, not the inserted SSDT");
                    }
                    continue;
                }
                self.placeholder
            } else if linked {
                self.placeholder
            } else {
                linked = true;
                self.new_ssdt
            };
            log::info!("root table {root:#x} slot {index}: SSDT {phys:#x} -> {replacement:#x}");
            rsdt::set_entry(handler, root, is_xsdt, index, replacement)?;
        }

        if linked {
            rsdt::refresh_checksum(handler, root)
        } else {
            rsdt::append_entry(handler, root, is_xsdt, self.new_ssdt)
        }
    }

    fn conflicts(&self, handler: &impl AcpiHandler, phys: u64, scanner: &mut AmlScanner) -> bool {
        let Ok(header) = sdt::read_header(handler, phys) else {
            return false;
        };
        if header.signature() != SSDT_SIGNATURE {
            return false;
        }
        if phys == self.placeholder || header.oem_table_id == PLACEHOLDER_TABLE_ID {
            return true;
        }
        match sdt::load_table(handler, phys, &SSDT_SIGNATURE) {
            Ok(table) => scanner.references_processor(table.body()),
            Err(err) => {
                log::debug!("SSDT {phys:#x} skipped: {err}");
                false
            }
        }
    }
}
