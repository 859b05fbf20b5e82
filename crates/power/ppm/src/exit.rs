//! Exit codes and the caller-visible exit record.

use arrayvec::ArrayVec;

/// Capacity of each diagnostic code list.
pub const ERROR_CODE_LIMIT: usize = 10;

/// Diagnostic codes, numbered as the caller sees them.
///
/// [`ExitCode::Completed`] is the only code a successful run records. Every
/// other code names either the stage that failed or, for
/// [`ExitCode::NoSsdtCreated`] and [`ExitCode::UnsupportedProcessor`], an
/// informational event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u32)]
pub enum ExitCode {
    /// The run completed.
    #[error("power management setup completed")]
    Completed = 0x01,
    /// P-state table construction failed.
    #[error("failed to build P-states")]
    BuildPstates = 0x02,
    /// EIST is disabled.
    #[error("EIST disabled")]
    EistDisabled = 0x03,
    /// The ACPI tables could not be located.
    #[error("failed to find ACPI tables")]
    FindAcpiTables = 0x04,
    /// The MADT could not be interpreted.
    #[error("failed to process MADT")]
    ProcessMadt = 0x05,
    /// MADT processors could not be matched to sockets and names.
    #[error("failed to process MADT info")]
    ProcessMadtInfo = 0x06,
    /// The SSDT could not be built or linked.
    #[error("failed to process SSDT")]
    ProcessSsdt = 0x07,
    /// The host context could not be initialized.
    #[error("failed to initialize host")]
    HostInit = 0x08,
    /// Per-socket discovery failed.
    #[error("failed to collect socket info")]
    CollectSocketInfo = 0x09,
    /// Policy could not be reconciled with hardware.
    #[error("failed to determine configuration")]
    DetermineConfiguration = 0x0A,
    /// Every feature ended disabled, so no SSDT was built.
    #[error("no SSDT created")]
    NoSsdtCreated = 0x0B,
    /// C-state table construction failed.
    #[error("failed to build C-states")]
    BuildCstates = 0x0C,
    /// T-state table construction failed.
    #[error("failed to build T-states")]
    BuildTstates = 0x0D,
    /// A MADT processor belongs to no discovered socket.
    #[error("failed to find package index from LAPIC")]
    FindPkgIndexFromLapic = 0x0E,
    /// The SSDT placement value is not a known placement.
    #[error("invalid SSDT location flag")]
    InvalidSsdtLocationFlag = 0x0F,
    /// The MADT lists no enabled processor.
    #[error("no LAPIC found in MADT")]
    NoLapicFoundInMadt = 0x10,
    /// The SSDT did not fit its buffer.
    #[error("SSDT size exceeded")]
    SsdtSizeExceeded = 0x11,
    /// SSDT emission failed.
    #[error("failed to build SSDT")]
    BuildSsdt = 0x12,
    /// A core index exceeded the per-socket core limit.
    #[error("max cores exceeded")]
    MaxCoresExceeded = 0x13,
    /// A MADT processor has no entry in the CPU map.
    #[error("failed to find CPU scope NameSeg")]
    FindCpuScopeNameSeg = 0x14,
    /// The FADT could not be patched.
    #[error("failed to update FADT")]
    UpdateFadt = 0x15,
    /// A general-protection fault was detected.
    #[error("GPF detected")]
    GpfDetected = 0x16,
    /// The SSDT buffer address is null.
    #[error("invalid SSDT address")]
    InvalidSsdtAddr = 0x17,
    /// The SSDT buffer length is zero.
    #[error("invalid SSDT length")]
    InvalidSsdtLen = 0x18,
    /// PCIe save/restore failed.
    #[error("PCIe save/restore failure")]
    PcieSaveRestore = 0x19,
    /// A register could not be programmed because it is locked.
    #[error("blocked by locked register")]
    BlockedByLockedRegister = 0x1A,
    /// The processor family is not in the detection table.
    #[error("unsupported processor")]
    UnsupportedProcessor = 0x1B,
    /// More sockets answered than can be tracked.
    #[error("failed to save socket proxy")]
    SocketProxySave = 0x1C,
}

impl ExitCode {
    /// The numeric code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// The symbolic name, as printed by boot-time tooling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Completed => "EXIT_CODE_PPM_COMPLETED",
            Self::BuildPstates => "EXIT_CODE_FAILED_BUILD_PSTATES",
            Self::EistDisabled => "EXIT_CODE_PPM_EIST_DISABLED",
            Self::FindAcpiTables => "EXIT_CODE_FAILED_FIND_ACPI_TABLES",
            Self::ProcessMadt => "EXIT_CODE_FAILED_PROCESS_MADT",
            Self::ProcessMadtInfo => "EXIT_CODE_FAILED_PROCESS_MADT_INFO",
            Self::ProcessSsdt => "EXIT_CODE_FAILED_PROCESS_SSDT",
            Self::HostInit => "EXIT_CODE_FAILED_HOST_INIT",
            Self::CollectSocketInfo => "EXIT_CODE_FAILED_COLLECT_SOCKET_INFO",
            Self::DetermineConfiguration => "EXIT_CODE_FAILED_DETERMINE_CONFIGURATION",
            Self::NoSsdtCreated => "EXIT_CODE_NO_SSDT_CREATED",
            Self::BuildCstates => "EXIT_CODE_FAILED_BUILD_CSTATES",
            Self::BuildTstates => "EXIT_CODE_FAILED_BUILD_TSTATES",
            Self::FindPkgIndexFromLapic => "EXIT_CODE_FAILED_FIND_PKG_INDEX_FROM_LAPIC",
            Self::InvalidSsdtLocationFlag => "EXIT_CODE_FAILED_INVALID_SSDT_LOCATION_FLAG",
            Self::NoLapicFoundInMadt => "EXIT_CODE_FAILED_NO_LAPIC_FOUND_IN_MADT",
            Self::SsdtSizeExceeded => "EXIT_CODE_FAILED_SSDT_SIZE_EXCEEDED",
            Self::BuildSsdt => "EXIT_CODE_FAILED_BUILD_SSDT",
            Self::MaxCoresExceeded => "EXIT_CODE_MAX_CORES_EXCEEDED",
            Self::FindCpuScopeNameSeg => "EXIT_CODE_FAILED_FIND_CPU_SCOPE_NAME_SEG",
            Self::UpdateFadt => "EXIT_CODE_FAILED_UPDATE_FADT",
            Self::GpfDetected => "EXIT_CODE_GPF_DETECTED",
            Self::InvalidSsdtAddr => "EXIT_CODE_INVALID_SSDT_ADDR",
            Self::InvalidSsdtLen => "EXIT_CODE_INVALID_SSDT_LEN",
            Self::PcieSaveRestore => "EXIT_CODE_PCIE_SAVE_RESTORE_FAILURE",
            Self::BlockedByLockedRegister => "EXIT_CODE_BLOCKED_BY_LOCKED_REGISTER",
            Self::UnsupportedProcessor => "EXIT_CODE_UNSUPPORTED_PROCESSOR",
            Self::SocketProxySave => "EXIT_CODE_FAILED_SOCKET_PROXY_SAVE",
        }
    }
}

impl TryFrom<u32> for ExitCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::Completed,
            0x02 => Self::BuildPstates,
            0x03 => Self::EistDisabled,
            0x04 => Self::FindAcpiTables,
            0x05 => Self::ProcessMadt,
            0x06 => Self::ProcessMadtInfo,
            0x07 => Self::ProcessSsdt,
            0x08 => Self::HostInit,
            0x09 => Self::CollectSocketInfo,
            0x0A => Self::DetermineConfiguration,
            0x0B => Self::NoSsdtCreated,
            0x0C => Self::BuildCstates,
            0x0D => Self::BuildTstates,
            0x0E => Self::FindPkgIndexFromLapic,
            0x0F => Self::InvalidSsdtLocationFlag,
            0x10 => Self::NoLapicFoundInMadt,
            0x11 => Self::SsdtSizeExceeded,
            0x12 => Self::BuildSsdt,
            0x13 => Self::MaxCoresExceeded,
            0x14 => Self::FindCpuScopeNameSeg,
            0x15 => Self::UpdateFadt,
            0x16 => Self::GpfDetected,
            0x17 => Self::InvalidSsdtAddr,
            0x18 => Self::InvalidSsdtLen,
            0x19 => Self::PcieSaveRestore,
            0x1A => Self::BlockedByLockedRegister,
            0x1B => Self::UnsupportedProcessor,
            0x1C => Self::SocketProxySave,
            other => return Err(other),
        })
    }
}

/// A bounded list of diagnostic codes. Codes past the capacity are dropped.
pub type ErrorCodes = ArrayVec<ExitCode, ERROR_CODE_LIMIT>;

fn push_capped(codes: &mut ErrorCodes, code: ExitCode) {
    if codes.try_push(code).is_err() {
        log::debug!("error code list full, dropping {}", code.name());
    }
}

/// The outcome of one run, always filled in before the run returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitState {
    /// `true` on success.
    pub return_status: bool,
    /// Failure and informational codes, in the order they were raised.
    pub error_codes: ErrorCodes,
    /// Final physical address of the SSDT, or 0.
    pub ssdt_mem_addr: u32,
    /// Final length of the SSDT, or 0.
    pub ssdt_mem_size: u32,
    /// Final P-state enablement.
    pub pstates_enabled: bool,
    /// Final Turbo enablement.
    pub turbo_enabled: bool,
    /// Final C-state enablement.
    pub cstates_enabled: bool,
    /// Final T-state enablement.
    pub tstates_enabled: bool,
}

impl ExitState {
    /// Append `code`, silently dropping it if the list is full.
    pub fn record(&mut self, code: ExitCode) {
        push_capped(&mut self.error_codes, code);
    }

    /// Number of codes recorded.
    #[must_use]
    pub fn error_code_count(&self) -> usize {
        self.error_codes.len()
    }

    /// The codes as the fixed-width array a legacy caller reads, unused
    /// slots zeroed.
    #[must_use]
    pub fn raw_error_codes(&self) -> [u32; ERROR_CODE_LIMIT] {
        let mut raw = [0; ERROR_CODE_LIMIT];
        for (slot, code) in raw.iter_mut().zip(&self.error_codes) {
            *slot = code.code();
        }
        raw
    }

    /// `true` if the run succeeded with nothing but the completion code.
    #[must_use]
    pub fn is_clean_success(&self) -> bool {
        self.return_status && self.error_codes.as_slice() == [ExitCode::Completed]
    }
}

/// Codes raised inside broadcast callbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmpExitState {
    /// Codes in the order they were raised.
    pub error_codes: ErrorCodes,
}

impl SmpExitState {
    /// Append `code`, silently dropping it if the list is full.
    pub fn record(&mut self, code: ExitCode) {
        push_capped(&mut self.error_codes, code);
    }

    /// `true` if no callback reported a failure.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.error_codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_their_numbers() {
        for raw in 1..=0x1C {
            let code = ExitCode::try_from(raw).unwrap();
            assert_eq!(code.code(), raw);
            assert!(code.name().starts_with("EXIT_CODE_"));
        }
        assert_eq!(ExitCode::try_from(0), Err(0));
        assert_eq!(ExitCode::try_from(0x1D), Err(0x1D));
    }

    #[test]
    fn list_overflow_is_capped() {
        let mut state = ExitState::default();
        for _ in 0..ERROR_CODE_LIMIT + 3 {
            state.record(ExitCode::GpfDetected);
        }
        assert_eq!(state.error_code_count(), ERROR_CODE_LIMIT);
    }

    #[test]
    fn raw_codes_zero_unused_slots() {
        let mut state = ExitState::default();
        state.record(ExitCode::BuildSsdt);
        state.record(ExitCode::SsdtSizeExceeded);
        let raw = state.raw_error_codes();
        assert_eq!(raw[..3], [0x12, 0x11, 0]);
        assert!(raw[2..].iter().all(|&c| c == 0));
    }

    #[test]
    fn clean_success_needs_only_the_completion_code() {
        let mut state = ExitState {
            return_status: true,
            ..ExitState::default()
        };
        state.record(ExitCode::Completed);
        assert!(state.is_clean_success());
        state.record(ExitCode::NoSsdtCreated);
        assert!(!state.is_clean_success());
    }
}
