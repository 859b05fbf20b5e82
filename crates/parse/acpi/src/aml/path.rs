//! AML name segments and paths.
//!
//! ACPI names are composed of 4-byte segments. Paths are formed by chaining
//! segments together, with a maximum inline capacity of 16 segments sufficient
//! for all practical ACPI namespace depths.

/// A 4-byte AML name segment (e.g., `_SB_`, `CPU0`, `_PSS`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameSeg(pub [u8; 4]);

impl NameSeg {
    /// The legacy processor namespace root, `_PR_`.
    pub const PR: Self = Self(*b"_PR_");
    /// The system bus namespace root, `_SB_`.
    pub const SB: Self = Self(*b"_SB_");

    /// Create a `NameSeg` from a 4-byte slice.
    ///
    /// Returns `None` if the slice is shorter than 4 bytes or does not start
    /// with a valid lead character.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let seg: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        is_lead_char(seg[0]).then_some(Self(seg))
    }

    /// Returns the name as a UTF-8 string (ACPI names are always ASCII).
    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0).unwrap_or("????")
    }
}

/// Returns `true` if `byte` may start a name segment (`A`-`Z` or `_`).
#[must_use]
pub const fn is_lead_char(byte: u8) -> bool {
    matches!(byte, b'A'..=b'Z' | b'_')
}

impl core::fmt::Debug for NameSeg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NameSeg(\"{}\")", self.as_str())
    }
}

impl core::fmt::Display for NameSeg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum number of segments in an inline AML path.
pub const MAX_PATH_DEPTH: usize = 16;

/// A fixed-capacity, absolute AML namespace path.
///
/// Stores up to [`MAX_PATH_DEPTH`] (16) segments inline, which is sufficient
/// for all practical ACPI namespace depths.
#[derive(Clone, Copy)]
pub struct AmlPath {
    segments: [NameSeg; MAX_PATH_DEPTH],
    len: u8,
}

impl AmlPath {
    /// The root path (`\`).
    pub const ROOT: Self = Self {
        segments: [NameSeg(*b"____"); MAX_PATH_DEPTH],
        len: 0,
    };

    /// Creates an empty path.
    #[must_use]
    pub const fn new() -> Self {
        Self::ROOT
    }

    /// Build a path from `segs`, or `None` if there are too many.
    #[must_use]
    pub fn from_segments(segs: &[NameSeg]) -> Option<Self> {
        let mut path = Self::ROOT;
        for &seg in segs {
            if !path.push(seg) {
                return None;
            }
        }
        Some(path)
    }

    /// Appends a name segment to the path.
    ///
    /// Returns `false` if the path is already at maximum capacity.
    pub fn push(&mut self, seg: NameSeg) -> bool {
        if (self.len as usize) >= MAX_PATH_DEPTH {
            return false;
        }
        self.segments[self.len as usize] = seg;
        self.len += 1;
        true
    }

    /// Removes and returns the last name segment from the path.
    pub fn pop(&mut self) -> Option<NameSeg> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.segments[self.len as usize])
    }

    /// Returns the segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[NameSeg] {
        &self.segments[..self.len as usize]
    }

    /// Returns the number of segments (depth) in this path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.len as usize
    }

    /// Returns the number of segments that can still be pushed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        MAX_PATH_DEPTH - self.depth()
    }
}

impl Default for AmlPath {
    fn default() -> Self {
        Self::ROOT
    }
}

impl PartialEq for AmlPath {
    fn eq(&self, other: &Self) -> bool {
        self.segments() == other.segments()
    }
}

impl Eq for AmlPath {}

impl core::fmt::Debug for AmlPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AmlPath({self})")
    }
}

impl core::fmt::Display for AmlPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "\\")?;
        for (i, seg) in self.segments().iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}
