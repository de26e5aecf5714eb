//! Instruction encoding shared by the compiler and the interpreter.
//!
//! Every field compiles to one instruction:
//!
//! ```text
//! header   : opcode (low nibble) | NAMED | ARRAY | LITTLE_ENDIAN | WIDE
//! ext      : present iff WIDE; EXPRESSION_OR_WHOLESTREAM | EXTRA_AS_EXPRESSION | EXTRA_DIFF_TYPE
//! length   : packed int, present for fixed-length arrays
//! extra    : packed int, present for opcodes taking an extra parameter given as a literal
//! custom   : packed int index into the custom type table (CUSTOMTYPE only)
//! start    : packed int offset of the matching STRUCT_START (STRUCT_END only)
//! ```
//!
//! `ARRAY` with `EXPRESSION_OR_WHOLESTREAM` is an expression-sized array, the ext flag alone
//! marks a whole-stream array. Expression operands are not stored inline: the interpreter
//! takes the next entry of the block's evaluator table, in the order length then extra.

pub const CODE_ALIGN: u8 = 0x01;
pub const CODE_BIT: u8 = 0x02;
pub const CODE_BOOL: u8 = 0x03;
pub const CODE_UBYTE: u8 = 0x04;
pub const CODE_BYTE: u8 = 0x05;
pub const CODE_USHORT: u8 = 0x06;
pub const CODE_SHORT: u8 = 0x07;
pub const CODE_INT: u8 = 0x08;
pub const CODE_LONG: u8 = 0x09;
pub const CODE_STRUCT_START: u8 = 0x0A;
pub const CODE_STRUCT_END: u8 = 0x0B;
pub const CODE_SKIP: u8 = 0x0C;
pub const CODE_VAR: u8 = 0x0D;
pub const CODE_RESET_COUNTER: u8 = 0x0E;
pub const CODE_CUSTOMTYPE: u8 = 0x0F;

pub const FLAG_NAMED: u8 = 0x10;
pub const FLAG_ARRAY: u8 = 0x20;
pub const FLAG_LITTLE_ENDIAN: u8 = 0x40;
pub const FLAG_WIDE: u8 = 0x80;

pub const EXT_FLAG_EXPRESSION_OR_WHOLESTREAM: u8 = 0x01;
pub const EXT_FLAG_EXTRA_AS_EXPRESSION: u8 = 0x02;
pub const EXT_FLAG_EXTRA_DIFF_TYPE: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BytecodeError {
    #[error("bytecode truncated at offset {0}")]
    Truncated(usize),
    #[error("unknown opcode 0x{code:02x} at offset {offset}")]
    UnknownOpcode { code: u8, offset: usize },
    #[error("invalid packed integer prefix 0x{prefix:02x} at offset {offset}")]
    BadPackedInt { prefix: u8, offset: usize },
    #[error("structure end at offset {offset} closes {found}, expected {expected}")]
    StructMismatch { offset: usize, expected: usize, found: usize },
    #[error("unbalanced structure end at offset {0}")]
    UnbalancedStructEnd(usize),
    #[error("unterminated structure starting at offset {0}")]
    UnterminatedStruct(usize),
    #[error("named field table out of step at offset {0}")]
    NamedFieldMismatch(usize),
    #[error("missing expression evaluator #{0}")]
    MissingEvaluator(usize),
    #[error("missing custom type descriptor #{0}")]
    MissingCustomType(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Align,
    Bit,
    Bool,
    UByte,
    Byte,
    UShort,
    Short,
    Int,
    Long,
    StructStart,
    StructEnd,
    Skip,
    Var,
    ResetCounter,
    CustomType,
}

impl Opcode {
    pub fn code(self) -> u8 {
        match self {
            Opcode::Align => CODE_ALIGN,
            Opcode::Bit => CODE_BIT,
            Opcode::Bool => CODE_BOOL,
            Opcode::UByte => CODE_UBYTE,
            Opcode::Byte => CODE_BYTE,
            Opcode::UShort => CODE_USHORT,
            Opcode::Short => CODE_SHORT,
            Opcode::Int => CODE_INT,
            Opcode::Long => CODE_LONG,
            Opcode::StructStart => CODE_STRUCT_START,
            Opcode::StructEnd => CODE_STRUCT_END,
            Opcode::Skip => CODE_SKIP,
            Opcode::Var => CODE_VAR,
            Opcode::ResetCounter => CODE_RESET_COUNTER,
            Opcode::CustomType => CODE_CUSTOMTYPE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code & 0x0F {
            CODE_ALIGN => Opcode::Align,
            CODE_BIT => Opcode::Bit,
            CODE_BOOL => Opcode::Bool,
            CODE_UBYTE => Opcode::UByte,
            CODE_BYTE => Opcode::Byte,
            CODE_USHORT => Opcode::UShort,
            CODE_SHORT => Opcode::Short,
            CODE_INT => Opcode::Int,
            CODE_LONG => Opcode::Long,
            CODE_STRUCT_START => Opcode::StructStart,
            CODE_STRUCT_END => Opcode::StructEnd,
            CODE_SKIP => Opcode::Skip,
            CODE_VAR => Opcode::Var,
            CODE_RESET_COUNTER => Opcode::ResetCounter,
            CODE_CUSTOMTYPE => Opcode::CustomType,
            _ => return None,
        })
    }

    /// Opcodes carrying an extra numeric parameter (literal or expression).
    pub fn takes_extra(self) -> bool {
        matches!(
            self,
            Opcode::Align | Opcode::Bit | Opcode::Skip | Opcode::Var | Opcode::CustomType
        )
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Align => "ALIGN",
            Opcode::Bit => "BIT",
            Opcode::Bool => "BOOL",
            Opcode::UByte => "UBYTE",
            Opcode::Byte => "BYTE",
            Opcode::UShort => "USHORT",
            Opcode::Short => "SHORT",
            Opcode::Int => "INT",
            Opcode::Long => "LONG",
            Opcode::StructStart => "STRUCT_START",
            Opcode::StructEnd => "STRUCT_END",
            Opcode::Skip => "SKIP",
            Opcode::Var => "VAR",
            Opcode::ResetCounter => "RESET_COUNTER",
            Opcode::CustomType => "CUSTOMTYPE",
        }
    }
}

/// How an instruction's element count is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Single,
    Fixed,
    Expression,
    WholeStream,
}

/// Decoded one/two byte instruction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub opcode: Opcode,
    /// NAMED | ARRAY | LITTLE_ENDIAN (WIDE is derived from `ext`).
    pub flags: u8,
    pub ext: u8,
}

impl Header {
    pub fn new(opcode: Opcode) -> Self {
        Header { opcode, flags: 0, ext: 0 }
    }

    pub fn is_named(&self) -> bool {
        self.flags & FLAG_NAMED != 0
    }
    pub fn is_little_endian(&self) -> bool {
        self.flags & FLAG_LITTLE_ENDIAN != 0
    }
    pub fn is_wide(&self) -> bool {
        self.ext != 0
    }
    pub fn extra_is_expression(&self) -> bool {
        self.ext & EXT_FLAG_EXTRA_AS_EXPRESSION != 0
    }
    pub fn is_diff_type(&self) -> bool {
        self.ext & EXT_FLAG_EXTRA_DIFF_TYPE != 0
    }

    pub fn array_kind(&self) -> ArrayKind {
        let array = self.flags & FLAG_ARRAY != 0;
        let expr_or_whole = self.ext & EXT_FLAG_EXPRESSION_OR_WHOLESTREAM != 0;
        match (array, expr_or_whole) {
            (false, false) => ArrayKind::Single,
            (true, false) => ArrayKind::Fixed,
            (true, true) => ArrayKind::Expression,
            (false, true) => ArrayKind::WholeStream,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut first = self.opcode.code() | (self.flags & (FLAG_NAMED | FLAG_ARRAY | FLAG_LITTLE_ENDIAN));
        if self.is_wide() {
            first |= FLAG_WIDE;
        }
        out.push(first);
        if self.is_wide() {
            out.push(self.ext);
        }
    }

    pub fn decode(code: &[u8], pos: &mut usize) -> Result<Self, BytecodeError> {
        let offset = *pos;
        let first = *code.get(offset).ok_or(BytecodeError::Truncated(offset))?;
        let opcode = Opcode::from_code(first).ok_or(BytecodeError::UnknownOpcode { code: first, offset })?;
        *pos += 1;
        let ext = if first & FLAG_WIDE != 0 {
            let b = *code.get(*pos).ok_or(BytecodeError::Truncated(*pos))?;
            *pos += 1;
            b
        } else {
            0
        };
        Ok(Header {
            opcode,
            flags: first & (FLAG_NAMED | FLAG_ARRAY | FLAG_LITTLE_ENDIAN),
            ext,
        })
    }
}

/// Append `value` as a packed integer: 1 byte below 0x80, `0x80` + 2 bytes below 0x10000,
/// otherwise `0x81` + 4 bytes (big endian).
pub fn pack_int(out: &mut Vec<u8>, value: u32) {
    if value & 0xFFFF_FF80 == 0 {
        out.push(value as u8);
    } else if value & 0xFFFF_0000 == 0 {
        out.push(0x80);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else {
        out.push(0x81);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

pub fn unpack_int(code: &[u8], pos: &mut usize) -> Result<u32, BytecodeError> {
    let offset = *pos;
    let prefix = *code.get(offset).ok_or(BytecodeError::Truncated(offset))?;
    let len = match prefix {
        p if p & 0x80 == 0 => {
            *pos += 1;
            return Ok(p as u32);
        }
        0x80 => 2,
        0x81 => 4,
        p => return Err(BytecodeError::BadPackedInt { prefix: p, offset }),
    };
    let bytes = code
        .get(offset + 1..offset + 1 + len)
        .ok_or(BytecodeError::Truncated(offset + 1))?;
    *pos = offset + 1 + len;
    Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

/// One fully decoded instruction (inline operands only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub header: Header,
    pub array_len: Option<u32>,
    pub extra: Option<u32>,
    pub custom_index: Option<u32>,
    /// For STRUCT_END: offset of the matching STRUCT_START.
    pub struct_start: Option<u32>,
}

impl Instruction {
    pub fn decode(code: &[u8], pos: &mut usize) -> Result<Self, BytecodeError> {
        let offset = *pos;
        let header = Header::decode(code, pos)?;
        let mut insn = Instruction {
            offset,
            header,
            array_len: None,
            extra: None,
            custom_index: None,
            struct_start: None,
        };
        if header.opcode == Opcode::StructEnd {
            insn.struct_start = Some(unpack_int(code, pos)?);
            return Ok(insn);
        }
        if header.array_kind() == ArrayKind::Fixed {
            insn.array_len = Some(unpack_int(code, pos)?);
        }
        if header.opcode.takes_extra() && !header.extra_is_expression() {
            insn.extra = Some(unpack_int(code, pos)?);
        }
        if header.opcode == Opcode::CustomType {
            insn.custom_index = Some(unpack_int(code, pos)?);
        }
        Ok(insn)
    }
}
