//! The versioned options record a caller hands to [`ppm_start`](crate::ppm_start).
//!
//! Fields keep the caller's raw numeric encoding so the record can be filled
//! in by code that predates this crate; typed views decode them on demand.

use arrayvec::ArrayVec;
use pmrc_acpi::aml::NameSeg;

use crate::exit::{ExitCode, ExitState};

/// Interface major version implemented by this engine.
pub const INTERFACE_MAJOR: u16 = 12;
/// Interface minor version implemented by this engine.
pub const INTERFACE_MINOR: u16 = 3;
/// Packed interface version: major in the high half, minor in the low half.
pub const INTERFACE_VERSION: u32 = ((INTERFACE_MAJOR as u32) << 16) | INTERFACE_MINOR as u32;

/// Capacity of the caller-supplied processor map.
pub const CPU_MAP_LIMIT: usize = 256;
/// Segments stored per processor path, below the namespace root.
pub const MAX_SUPPORTED_CPU_NAMESEGS: usize = 3;

/// Where the built SSDT goes and how it is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsdtLocation {
    /// Build in a scratch buffer, move the RSDT down, and place the SSDT
    /// between them.
    Reclaim,
    /// Build at the supplied address and move the RSDT just below it.
    AddressProvided,
    /// Build at the supplied address and link nothing.
    AddressProvidedNoInsert,
    /// Build at the supplied address and append it to the RSDT and XSDT in
    /// place.
    AddressProvidedInsert,
}

impl TryFrom<u32> for SsdtLocation {
    type Error = ExitCode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Reclaim),
            1 => Ok(Self::AddressProvided),
            2 => Ok(Self::AddressProvidedNoInsert),
            3 => Ok(Self::AddressProvidedInsert),
            _ => Err(ExitCode::InvalidSsdtLocationFlag),
        }
    }
}

impl SsdtLocation {
    /// `true` for every placement that builds at the caller's address.
    #[must_use]
    pub const fn uses_caller_address(self) -> bool {
        !matches!(self, Self::Reclaim)
    }
}

/// `_PSD` coordination type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PstateCoordination {
    /// Software coordinates, every processor in the domain transitions.
    SwAll = 0xFC,
    /// Software coordinates, any processor may transition.
    SwAny = 0xFD,
    /// Hardware coordinates.
    HwAll = 0xFE,
}

impl From<u32> for PstateCoordination {
    /// Out-of-range values select hardware coordination.
    fn from(value: u32) -> Self {
        match value {
            0xFC => Self::SwAll,
            0xFD => Self::SwAny,
            _ => Self::HwAll,
        }
    }
}

/// Namespace root the processor objects live under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuNamespace {
    /// `\_PR_`, the ACPI 1.0 processor scope.
    #[default]
    Pr,
    /// `\_SB_`, the ACPI 2.0+ location.
    Sb,
}

impl CpuNamespace {
    /// The root segment.
    #[must_use]
    pub const fn name_seg(self) -> NameSeg {
        match self {
            Self::Pr => NameSeg::PR,
            Self::Sb => NameSeg::SB,
        }
    }

    /// The caller encoding.
    #[must_use]
    pub const fn flag(self) -> u32 {
        match self {
            Self::Pr => 0,
            Self::Sb => 1,
        }
    }
}

impl From<u32> for CpuNamespace {
    fn from(value: u32) -> Self {
        if value == 0 { Self::Pr } else { Self::Sb }
    }
}

/// How hardware C3 is published to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C3Policy {
    /// C3 is not published.
    Disabled,
    /// C3 is published as ACPI C2.
    AsC2,
    /// C3 is published as ACPI C3.
    AsC3,
    /// ACPI C2 when the TSC is invariant, ACPI C3 otherwise.
    Auto,
}

impl From<u32> for C3Policy {
    fn from(value: u32) -> Self {
        match value {
            2 => Self::AsC2,
            3 => Self::AsC3,
            4 | 5 => Self::Auto,
            _ => Self::Disabled,
        }
    }
}

/// Energy-performance bias policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformancePerWatt {
    /// Maximum performance.
    Traditional,
    /// Balanced performance and energy.
    Balanced,
    /// Lowest power.
    LowPower,
}

impl From<u32> for PerformancePerWatt {
    /// Unknown values select [`PerformancePerWatt::Traditional`].
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Balanced,
            2 => Self::LowPower,
            _ => Self::Traditional,
        }
    }
}

/// One processor's ACPI name, as supplied by the caller or discovered in
/// the DSDT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMapEntry {
    /// ACPI processor id, matched against the MADT.
    pub acpi_processor_number: u32,
    /// Number of valid entries in `nameseg`.
    pub seg_count: u32,
    /// Path segments below the namespace root.
    pub nameseg: [NameSeg; MAX_SUPPORTED_CPU_NAMESEGS],
}

impl CpuMapEntry {
    /// The valid path segments.
    #[must_use]
    pub fn segments(&self) -> &[NameSeg] {
        let count = (self.seg_count as usize).min(MAX_SUPPORTED_CPU_NAMESEGS);
        &self.nameseg[..count]
    }
}

/// The caller's policy and output record.
#[derive(Debug, Clone)]
pub struct Options {
    /// Packed `major << 16 | minor` version of the caller's interface.
    pub interface_version: u32,
    /// Enable P-states.
    pub pstates_enabled: bool,
    /// Enable Turbo.
    pub turbo_enabled: bool,
    /// Enable C-states.
    pub cstates_enabled: bool,
    /// Enable C1E.
    pub c1e_enabled: bool,
    /// Publish C6.
    pub c6_enabled: bool,
    /// Publish C7.
    pub c7_enabled: bool,
    /// Let the OS use MWAIT for C-states.
    pub mwait_enabled: bool,
    /// Enable T-states.
    pub tstates_enabled: bool,
    /// Build the SSDT even when every feature ends disabled.
    pub ssdt_force_creation: bool,
    /// Patch the FADT PM blocks.
    pub modify_fadt_flag: bool,
    /// Allow ACPI table access. Forced on for callers older than 12.2.
    pub acpi_access: bool,
    /// Scratch memory below 1 MiB offered by the caller.
    pub mem_region_below_1m: u32,
    /// Sockets the caller expects.
    pub num_sockets: u32,
    /// Raw `_PSD` coordination type.
    pub pstate_coordination: u32,
    /// Raw C3 policy.
    pub c3_enabled: u32,
    /// PM I/O base address.
    pub pmbase: u32,
    /// Deepest package C-state to allow.
    pub package_cstate_limit: u32,
    /// SSDT target address for the address-provided placements.
    pub ssdt_mem_addr: u32,
    /// SSDT target size for the address-provided placements.
    pub ssdt_mem_size: u32,
    /// Raw SSDT placement.
    pub ssdt_loc_flag: u32,
    /// Raw namespace root selection.
    pub cpu_namespace_flag: u32,
    /// Real-mode callback flag, passed through untouched.
    pub realmode_callback_flag: u32,
    /// Real-mode callback address, passed through untouched.
    pub realmode_callback_address: u32,
    /// Raw energy-performance bias policy.
    pub performance_per_watt: u32,
    /// Logical processors the caller expects.
    pub logical_cpu_count: u32,
    /// Processor names, by ACPI id.
    pub cpu_map: ArrayVec<CpuMapEntry, CPU_MAP_LIMIT>,
    /// The outcome, filled in by the engine.
    pub exit_state: ExitState,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interface_version: INTERFACE_VERSION,
            pstates_enabled: true,
            turbo_enabled: true,
            cstates_enabled: true,
            c1e_enabled: true,
            c6_enabled: true,
            c7_enabled: true,
            mwait_enabled: true,
            tstates_enabled: true,
            ssdt_force_creation: false,
            modify_fadt_flag: true,
            acpi_access: true,
            mem_region_below_1m: 0,
            num_sockets: 1,
            pstate_coordination: PstateCoordination::HwAll as u32,
            c3_enabled: 4,
            pmbase: 0x400,
            package_cstate_limit: 7,
            ssdt_mem_addr: 0,
            ssdt_mem_size: 0,
            ssdt_loc_flag: 0,
            cpu_namespace_flag: 0,
            realmode_callback_flag: 0,
            realmode_callback_address: 0,
            performance_per_watt: 0,
            logical_cpu_count: 0,
            cpu_map: ArrayVec::new(),
            exit_state: ExitState::default(),
        }
    }
}

impl Options {
    /// Major half of [`Options::interface_version`].
    #[must_use]
    pub const fn major(&self) -> u16 {
        (self.interface_version >> 16) as u16
    }

    /// Minor half of [`Options::interface_version`].
    #[must_use]
    pub const fn minor(&self) -> u16 {
        self.interface_version as u16
    }

    /// Whether this engine accepts the caller's interface version.
    ///
    /// The current major with a minor no newer than ours is accepted, and so
    /// is any caller one major release behind.
    #[must_use]
    pub const fn version_supported(&self) -> bool {
        let major = self.major();
        major == INTERFACE_MAJOR - 1 || (major == INTERFACE_MAJOR && self.minor() <= INTERFACE_MINOR)
    }

    /// Whether ACPI tables may be touched. Callers older than minor 2 had no
    /// way to say no.
    #[must_use]
    pub const fn acpi_allowed(&self) -> bool {
        self.minor() < 2 || self.acpi_access
    }

    /// The decoded SSDT placement.
    ///
    /// # Errors
    ///
    /// [`ExitCode::InvalidSsdtLocationFlag`] for an unknown value.
    pub fn ssdt_location(&self) -> Result<SsdtLocation, ExitCode> {
        SsdtLocation::try_from(self.ssdt_loc_flag)
    }

    /// The decoded namespace root.
    #[must_use]
    pub fn cpu_namespace(&self) -> CpuNamespace {
        CpuNamespace::from(self.cpu_namespace_flag)
    }

    /// The decoded C3 policy.
    #[must_use]
    pub fn c3_policy(&self) -> C3Policy {
        C3Policy::from(self.c3_enabled)
    }

    /// The decoded energy-performance bias policy.
    #[must_use]
    pub fn perf_per_watt(&self) -> PerformancePerWatt {
        PerformancePerWatt::from(self.performance_per_watt)
    }

    /// The map entry for ACPI processor `acpi_id`.
    #[must_use]
    pub fn cpu_map_entry(&self, acpi_id: u32) -> Option<&CpuMapEntry> {
        self.cpu_map.iter().find(|e| e.acpi_processor_number == acpi_id)
    }
}
