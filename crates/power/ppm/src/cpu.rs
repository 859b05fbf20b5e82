//! Processor family detection and family-dependent encodings.

use crate::platform::Cpu;

/// CPUID leaf 1: family, model, stepping and feature flags.
pub const LEAF_FEATURES: u32 = 0x1;
/// CPUID leaf 5: MONITOR/MWAIT.
pub const LEAF_MWAIT: u32 = 0x5;
/// CPUID leaf 6: thermal and power management.
pub const LEAF_POWER: u32 = 0x6;
/// CPUID leaf 0xB: extended topology.
pub const LEAF_TOPOLOGY: u32 = 0xB;
/// Highest extended leaf.
pub const LEAF_EXT_MAX: u32 = 0x8000_0000;
/// First of the three brand string leaves.
pub const LEAF_BRAND_FIRST: u32 = 0x8000_0002;
/// Last of the three brand string leaves.
pub const LEAF_BRAND_LAST: u32 = 0x8000_0004;

/// Family, model and extended model bits of CPUID.1 EAX.
const SIGNATURE_MASK: u32 = 0xFFFF0;

/// Processor families the engine knows how to program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuFamily {
    /// Not in the detection table; programmed like a legacy family.
    #[default]
    Unknown,
    /// Nehalem (Bloomfield/Gainestown).
    Nehalem,
    /// Lynnfield.
    Lynnfield,
    /// Clarkdale/Arrandale.
    Clarkdale,
    /// Westmere-EP.
    Westmere,
    /// Sandy Bridge client.
    SandyBridge,
    /// Sandy Bridge-EP (Jaketown).
    Jaketown,
    /// Nehalem-EX.
    NehalemEx,
    /// Westmere-EX.
    WestmereEx,
}

impl CpuFamily {
    /// Classify a CPUID.1 EAX signature.
    #[must_use]
    pub const fn from_signature(eax: u32) -> Self {
        match eax & SIGNATURE_MASK {
            0x106A0 => Self::Nehalem,
            0x106E0 => Self::Lynnfield,
            0x20650 => Self::Clarkdale,
            0x206C0 => Self::Westmere,
            0x206A0 => Self::SandyBridge,
            0x206D0 => Self::Jaketown,
            0x206E0 => Self::NehalemEx,
            0x206F0 => Self::WestmereEx,
            _ => Self::Unknown,
        }
    }

    /// Detect the family of `cpu`.
    pub fn detect(cpu: &impl Cpu) -> Self {
        Self::from_signature(cpu.cpuid(LEAF_FEATURES, 0).eax)
    }

    /// Families with RAPL power reporting and the 100 MHz base clock.
    #[must_use]
    pub const fn is_server_class(self) -> bool {
        matches!(self, Self::SandyBridge | Self::Jaketown)
    }

    /// Base clock in MHz.
    #[must_use]
    pub const fn bclk_mhz(self) -> u32 {
        if self.is_server_class() { 100 } else { 133 }
    }

    /// The IA32_PERF_CTL encoding of `ratio`.
    #[must_use]
    pub const fn encode_pstate(self, ratio: u32) -> u32 {
        if self.is_server_class() { ratio << 8 } else { ratio }
    }
}

/// Derive the manufactured maximum ratio from the processor brand string,
/// or 0 if the brand leaves are missing or carry no `d.ddGHz` figure.
pub fn max_ratio_from_brand(cpu: &impl Cpu, bclk_mhz: u32) -> u32 {
    if cpu.cpuid(LEAF_EXT_MAX, 0).eax < LEAF_BRAND_LAST {
        return 0;
    }
    let mut brand = [0u8; 48];
    for (chunk, leaf) in brand.chunks_exact_mut(16).zip(LEAF_BRAND_FIRST..=LEAF_BRAND_LAST) {
        let regs = cpu.cpuid(leaf, 0);
        for (dst, reg) in chunk.chunks_exact_mut(4).zip([regs.eax, regs.ebx, regs.ecx, regs.edx]) {
            dst.copy_from_slice(&reg.to_le_bytes());
        }
    }
    ratio_from_brand(&brand, bclk_mhz)
}

fn ratio_from_brand(brand: &[u8], bclk_mhz: u32) -> u32 {
    let Some(mut mhz) = brand.windows(7).find_map(frequency_mhz) else {
        return 0;
    };
    if bclk_mhz == 133 {
        // Snap to the 133.33 MHz grid.
        mhz = (mhz * 3 + 100) / 200 * 200 / 3;
    }
    mhz.checked_div(bclk_mhz).unwrap_or(0)
}

/// `d.ddGHz` in MHz.
fn frequency_mhz(window: &[u8]) -> Option<u32> {
    let &[a, b'.', b, c, b'G', b'H', b'z'] = window else {
        return None;
    };
    let digit = |d: u8| d.is_ascii_digit().then(|| u32::from(d - b'0'));
    Some(digit(a)? * 1000 + digit(b)? * 100 + digit(c)? * 10)
}
