//! AML opcode and prefix bytes.
//!
//! Extended opcodes are the byte that follows [`EXT_OP_PREFIX`].

/// `Zero` constant.
pub const ZERO: u8 = 0x00;
/// `One` constant.
pub const ONE: u8 = 0x01;
/// `Alias`.
pub const ALIAS: u8 = 0x06;
/// `Name`.
pub const NAME: u8 = 0x08;
/// `BytePrefix`.
pub const BYTE_PREFIX: u8 = 0x0A;
/// `WordPrefix`.
pub const WORD_PREFIX: u8 = 0x0B;
/// `DWordPrefix`.
pub const DWORD_PREFIX: u8 = 0x0C;
/// `StringPrefix`.
pub const STRING_PREFIX: u8 = 0x0D;
/// `QWordPrefix`.
pub const QWORD_PREFIX: u8 = 0x0E;
/// `Scope`.
pub const SCOPE: u8 = 0x10;
/// `Buffer`.
pub const BUFFER: u8 = 0x11;
/// `Package`.
pub const PACKAGE: u8 = 0x12;
/// `VarPackage`.
pub const VAR_PACKAGE: u8 = 0x13;
/// `Method`.
pub const METHOD: u8 = 0x14;
/// `DualNamePrefix`.
pub const DUAL_NAME_PREFIX: u8 = 0x2E;
/// `MultiNamePrefix`.
pub const MULTI_NAME_PREFIX: u8 = 0x2F;
/// `ExtOpPrefix`.
pub const EXT_OP_PREFIX: u8 = 0x5B;
/// `RootChar` (`\`).
pub const ROOT_CHAR: u8 = b'\\';
/// `ParentPrefixChar` (`^`).
pub const PARENT_PREFIX_CHAR: u8 = b'^';
/// `Local0`; `Local1`..`Local7` follow.
pub const LOCAL0: u8 = 0x60;
/// `Local7`.
pub const LOCAL7: u8 = 0x67;
/// `Arg0`; `Arg1`..`Arg6` follow.
pub const ARG0: u8 = 0x68;
/// `Arg6`.
pub const ARG6: u8 = 0x6E;
/// `Store`.
pub const STORE: u8 = 0x70;
/// `RefOf`.
pub const REF_OF: u8 = 0x71;
/// `Add`.
pub const ADD: u8 = 0x72;
/// `Concatenate`.
pub const CONCAT: u8 = 0x73;
/// `Subtract`.
pub const SUBTRACT: u8 = 0x74;
/// `Multiply`.
pub const MULTIPLY: u8 = 0x77;
/// `And`.
pub const AND: u8 = 0x7B;
/// `Or`.
pub const OR: u8 = 0x7D;
/// `DerefOf`.
pub const DEREF_OF: u8 = 0x83;
/// `SizeOf`.
pub const SIZE_OF: u8 = 0x87;
/// `Index`.
pub const INDEX: u8 = 0x88;
/// `CreateDWordField`.
pub const CREATE_DWORD_FIELD: u8 = 0x8A;
/// `LAnd`.
pub const LAND: u8 = 0x90;
/// `LOr`.
pub const LOR: u8 = 0x91;
/// `LNot`.
pub const LNOT: u8 = 0x92;
/// `LEqual`.
pub const LEQUAL: u8 = 0x93;
/// `LGreater`.
pub const LGREATER: u8 = 0x94;
/// `LLess`.
pub const LLESS: u8 = 0x95;
/// `If`.
pub const IF: u8 = 0xA0;
/// `Else`.
pub const ELSE: u8 = 0xA1;
/// `While`.
pub const WHILE: u8 = 0xA2;
/// `Noop`.
pub const NOOP: u8 = 0xA3;
/// `Return`.
pub const RETURN: u8 = 0xA4;
/// `Break`.
pub const BREAK: u8 = 0xA5;
/// `BreakPoint`.
pub const BREAK_POINT: u8 = 0xCC;
/// `Ones` constant.
pub const ONES: u8 = 0xFF;

/// Extended opcodes (second byte after [`EXT_OP_PREFIX`]).
pub mod ext {
    /// `Mutex`.
    pub const MUTEX: u8 = 0x01;
    /// `Event`.
    pub const EVENT: u8 = 0x02;
    /// `CondRefOf`.
    pub const COND_REF_OF: u8 = 0x12;
    /// `CreateField`.
    pub const CREATE_FIELD: u8 = 0x13;
    /// `Revision`.
    pub const REVISION: u8 = 0x30;
    /// `Debug`.
    pub const DEBUG: u8 = 0x31;
    /// `OperationRegion`.
    pub const OP_REGION: u8 = 0x80;
    /// `Field`.
    pub const FIELD: u8 = 0x81;
    /// `Device`.
    pub const DEVICE: u8 = 0x82;
    /// `Processor`.
    pub const PROCESSOR: u8 = 0x83;
    /// `PowerResource`.
    pub const POWER_RES: u8 = 0x84;
    /// `ThermalZone`.
    pub const THERMAL_ZONE: u8 = 0x85;
    /// `IndexField`.
    pub const INDEX_FIELD: u8 = 0x86;
}

/// Resource template small-item tags.
pub mod resource {
    /// Generic Register descriptor (large item 0x02).
    pub const GENERIC_REGISTER: u8 = 0x82;
    /// End Tag (small item 0x0F, length 1).
    pub const END_TAG: u8 = 0x79;
}
