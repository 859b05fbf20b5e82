//! AML (ACPI Machine Language) bytecode recognition and emission.
//!
//! [`parser::AmlScanner`] is a restricted recursive-descent recognizer: it
//! skips over the objects a DSDT or SSDT declares, records every
//! `Processor()` it meets, and can report whether a table references any of
//! the recorded processors. It never executes anything.
//!
//! [`builder::AmlWriter`] is the matching forward-only encoder used to
//! synthesize tables from scratch.

pub mod builder;
pub mod opcode;
pub mod parser;
pub mod path;

pub use builder::{AmlWriter, PkgLength, TableStart};
pub use parser::{AcpiProcessor, AmlScanner, Parse, Unhandled};
pub use path::{AmlPath, NameSeg};

/// Errors raised while emitting AML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AmlError {
    /// The next write would run past the end of the output buffer.
    #[error("AML output buffer exhausted")]
    SizeExceeded,
    /// A package grew beyond what its reserved length field can encode.
    #[error("package length {0:#x} exceeds its length encoding")]
    PackageTooLong(usize),
}
