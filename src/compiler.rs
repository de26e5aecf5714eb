//! Script compiler: tokens to a [`CompiledBlock`].
//!
//! Single pass over the token list. Each field becomes a one or two byte header followed
//! by packed-integer operands; structures are bracketed by STRUCT_START / STRUCT_END, the
//! latter carrying the start offset so the interpreter can re-run a body. Named fields
//! and expressions go to side tables in the order they are met, and the interpreter
//! consumes them in that same order.

use crate::bytecode::{
    pack_int, ArrayKind, Header, Instruction, Opcode, EXT_FLAG_EXPRESSION_OR_WHOLESTREAM,
    EXT_FLAG_EXTRA_AS_EXPRESSION, EXT_FLAG_EXTRA_DIFF_TYPE, FLAG_ARRAY, FLAG_LITTLE_ENDIAN, FLAG_NAMED,
};
use crate::codec::Endianness;
use crate::expr::{EvalError, Expression};
use crate::processor::{CustomFieldTypeProcessor, FieldTypeParameters};
use crate::tokenizer::{tokenize, Token, TokenKind};
use std::fmt;
use std::fmt::Write as _;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("unknown type '{type_name}' at {position}")]
    UnknownType { type_name: String, position: usize },
    #[error("{message} at {position}")]
    Invalid { message: String, position: usize },
    #[error("duplicate field name '{name}' at {position}")]
    DuplicateName { name: String, position: usize },
    #[error("invalid field name '{name}' at {position}: {reason}")]
    InvalidName {
        name: String,
        reason: &'static str,
        position: usize,
    },
    #[error("'}}' without an open structure at {position}")]
    UnexpectedStructEnd { position: usize },
    #[error("structure opened at {position} is not closed")]
    UnclosedStructure { position: usize },
    #[error("bad expression '{text}' at {position}: {source}")]
    Expression {
        text: String,
        position: usize,
        #[source]
        source: EvalError,
    },
    #[error("only one whole-stream array is allowed (second at {position})")]
    MultipleWholeStreamArrays { position: usize },
    #[error("whole-stream array at {position} is inside a repeated structure")]
    WholeStreamInRepeatedStruct { position: usize },
}

impl CompileError {
    /// Byte offset in the script the error refers to.
    pub fn position(&self) -> usize {
        match self {
            CompileError::Syntax { position, .. }
            | CompileError::UnknownType { position, .. }
            | CompileError::Invalid { position, .. }
            | CompileError::DuplicateName { position, .. }
            | CompileError::InvalidName { position, .. }
            | CompileError::UnexpectedStructEnd { position }
            | CompileError::UnclosedStructure { position }
            | CompileError::Expression { position, .. }
            | CompileError::MultipleWholeStreamArrays { position }
            | CompileError::WholeStreamInRepeatedStruct { position } => *position,
        }
    }
}

/// Path, simple name and bytecode offset of a named field or structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedFieldInfo {
    path: String,
    name: String,
    offset: usize,
}

impl NamedFieldInfo {
    pub fn new(path: impl Into<String>, name: impl Into<String>, offset: usize) -> Self {
        NamedFieldInfo {
            path: path.into(),
            name: name.into(),
            offset,
        }
    }

    /// Dotted, lowercased path from the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset of the field's instruction in the bytecode.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl fmt::Display for NamedFieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Immutable result of compilation; shareable across threads.
#[derive(Debug, Clone)]
pub struct CompiledBlock {
    source: String,
    bytecode: Vec<u8>,
    named_fields: Vec<NamedFieldInfo>,
    evaluators: Vec<Expression>,
    custom_fields: Vec<FieldTypeParameters>,
    has_var_fields: bool,
}

impl CompiledBlock {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Named fields in declaration order.
    pub fn named_fields(&self) -> &[NamedFieldInfo] {
        &self.named_fields
    }

    /// Array-length and extra expressions in the order the interpreter consumes them.
    pub fn evaluators(&self) -> &[Expression] {
        &self.evaluators
    }

    pub fn custom_fields(&self) -> &[FieldTypeParameters] {
        &self.custom_fields
    }

    pub fn has_var_fields(&self) -> bool {
        self.has_var_fields
    }

    pub fn has_evaluators(&self) -> bool {
        !self.evaluators.is_empty()
    }

    pub fn find_field_for_path(&self, path: &str) -> Option<&NamedFieldInfo> {
        let path = path.trim().to_ascii_lowercase();
        self.named_fields.iter().find(|f| f.path == path)
    }

    pub fn find_field_for_offset(&self, offset: usize) -> Option<&NamedFieldInfo> {
        self.named_fields.iter().find(|f| f.offset == offset)
    }

    /// One line per instruction, indented by structure depth.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut pos = 0;
        let mut depth = 0usize;
        let mut evaluator = 0usize;
        while pos < self.bytecode.len() {
            let insn = match Instruction::decode(&self.bytecode, &mut pos) {
                Ok(insn) => insn,
                Err(e) => {
                    let _ = writeln!(out, "!! {}", e);
                    break;
                }
            };
            let header = insn.header;
            if header.opcode == Opcode::StructEnd {
                depth = depth.saturating_sub(1);
            }
            let _ = write!(out, "{:04} {}{}", insn.offset, "  ".repeat(depth), header.opcode.mnemonic());
            if header.is_diff_type() {
                out.push('*');
            }
            if header.is_little_endian() {
                out.push_str(" <");
            }
            match header.array_kind() {
                ArrayKind::Single => {}
                ArrayKind::Fixed => {
                    let _ = write!(out, " [{}]", insn.array_len.unwrap_or(0));
                }
                ArrayKind::Expression => {
                    let text = self.evaluators.get(evaluator).map_or("?", Expression::text);
                    let _ = write!(out, " [{}]", text);
                    evaluator += 1;
                }
                ArrayKind::WholeStream => out.push_str(" [_]"),
            }
            if header.opcode.takes_extra() {
                if header.extra_is_expression() {
                    let text = self.evaluators.get(evaluator).map_or("?", Expression::text);
                    let _ = write!(out, " :({})", text);
                    evaluator += 1;
                } else if let Some(extra) = insn.extra {
                    let _ = write!(out, " :{}", extra as i32);
                }
            }
            if let Some(index) = insn.custom_index {
                let name = self
                    .custom_fields
                    .get(index as usize)
                    .map_or("?", |p| p.type_name.as_str());
                let _ = write!(out, " {}", name);
            }
            if let Some(start) = insn.struct_start {
                let _ = write!(out, " -> {:04}", start);
            }
            if header.is_named() {
                if let Some(info) = self.find_field_for_offset(insn.offset) {
                    let _ = write!(out, " {}", info.path);
                }
            }
            out.push('\n');
            if header.opcode == Opcode::StructStart {
                depth += 1;
            }
        }
        out
    }
}

/// Field types the DSL knows, before mapping onto opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Bit,
    Bool,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    Float,
    Double,
    String,
    Align,
    Skip,
    Val,
    Var,
    ResetCounter,
    Custom,
}

impl FieldType {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bit" => FieldType::Bit,
            "bool" => FieldType::Bool,
            "byte" => FieldType::Byte,
            "ubyte" => FieldType::UByte,
            "short" => FieldType::Short,
            "ushort" => FieldType::UShort,
            "int" => FieldType::Int,
            "uint" => FieldType::UInt,
            "long" => FieldType::Long,
            "floatj" | "float" => FieldType::Float,
            "doublej" | "double" => FieldType::Double,
            "stringj" | "string" => FieldType::String,
            "align" => FieldType::Align,
            "skip" => FieldType::Skip,
            "val" => FieldType::Val,
            "var" => FieldType::Var,
            "reset$$" => FieldType::ResetCounter,
            _ => return None,
        })
    }

    fn opcode(self) -> Opcode {
        match self {
            FieldType::Bit => Opcode::Bit,
            FieldType::Bool | FieldType::String => Opcode::Bool,
            FieldType::Byte | FieldType::UInt => Opcode::Byte,
            FieldType::UByte => Opcode::UByte,
            FieldType::Short => Opcode::Short,
            FieldType::UShort => Opcode::UShort,
            FieldType::Int | FieldType::Float => Opcode::Int,
            FieldType::Long | FieldType::Double => Opcode::Long,
            FieldType::Align => Opcode::Align,
            FieldType::Skip | FieldType::Val => Opcode::Skip,
            FieldType::Var => Opcode::Var,
            FieldType::ResetCounter => Opcode::ResetCounter,
            FieldType::Custom => Opcode::CustomType,
        }
    }

    fn is_diff_type(self) -> bool {
        matches!(
            self,
            FieldType::Float | FieldType::Double | FieldType::UInt | FieldType::String | FieldType::Val
        )
    }

    fn default_extra(self) -> Option<i32> {
        match self {
            FieldType::Bit | FieldType::Align | FieldType::Skip => Some(1),
            FieldType::Var | FieldType::Custom => Some(0),
            _ => None,
        }
    }

    /// Scalars whose value can feed an expression.
    fn is_numeric(self) -> bool {
        !matches!(
            self,
            FieldType::Bool
                | FieldType::String
                | FieldType::Float
                | FieldType::Double
                | FieldType::Align
                | FieldType::Skip
                | FieldType::ResetCounter
        )
    }
}

struct OpenStruct {
    name: Option<String>,
    start_offset: usize,
    named_start: usize,
    repeated: bool,
    position: usize,
}

struct Compiler<'p> {
    custom: Option<&'p dyn CustomFieldTypeProcessor>,
    out: Vec<u8>,
    named: Vec<NamedFieldInfo>,
    /// Parallel to `named`.
    numeric: Vec<bool>,
    evaluators: Vec<Expression>,
    custom_fields: Vec<FieldTypeParameters>,
    structs: Vec<OpenStruct>,
    whole_stream_seen: bool,
    has_var_fields: bool,
}

/// Compile a script. `custom` supplies extra type names and their admission check.
pub fn compile(
    source: &str,
    custom: Option<&dyn CustomFieldTypeProcessor>,
) -> Result<CompiledBlock, CompileError> {
    let tokens = tokenize(source)?;
    let mut compiler = Compiler {
        custom,
        out: Vec::with_capacity(tokens.len() * 2),
        named: Vec::new(),
        numeric: Vec::new(),
        evaluators: Vec::new(),
        custom_fields: Vec::new(),
        structs: Vec::new(),
        whole_stream_seen: false,
        has_var_fields: false,
    };
    for token in &tokens {
        match token.kind {
            TokenKind::Field => compiler.field(token)?,
            TokenKind::StructStart => compiler.struct_start(token)?,
            TokenKind::StructEnd => compiler.struct_end(token)?,
        }
    }
    if let Some(open) = compiler.structs.last() {
        return Err(CompileError::UnclosedStructure { position: open.position });
    }
    tracing::debug!(
        bytecode_len = compiler.out.len(),
        named_fields = compiler.named.len(),
        evaluators = compiler.evaluators.len(),
        custom_fields = compiler.custom_fields.len(),
        "compiled script"
    );
    Ok(CompiledBlock {
        source: source.to_string(),
        bytecode: compiler.out,
        named_fields: compiler.named,
        evaluators: compiler.evaluators,
        custom_fields: compiler.custom_fields,
        has_var_fields: compiler.has_var_fields,
    })
}

fn invalid(message: impl Into<String>, position: usize) -> CompileError {
    CompileError::Invalid {
        message: message.into(),
        position,
    }
}

fn validate_name(raw: &str, position: usize) -> Result<String, CompileError> {
    let name = raw.trim().to_ascii_lowercase();
    let fail = |reason| CompileError::InvalidName {
        name: name.clone(),
        reason,
        position,
    };
    if name.contains('.') {
        return Err(fail("must not contain '.'"));
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return Err(fail("must start with a letter or '_'")),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(fail("only letters, digits and '_' are allowed"));
    }
    Ok(name)
}

impl<'p> Compiler<'p> {
    fn field(&mut self, token: &Token) -> Result<(), CompileError> {
        let position = token.position;
        let raw_type = token.type_name.as_deref().unwrap_or_default();
        let type_lc = raw_type.to_ascii_lowercase();
        let byte_order = token.byte_order.unwrap_or_default();

        let (field_type, custom_params) = match FieldType::from_name(&type_lc) {
            Some(t) => (t, None),
            None => {
                let known = self.custom.map_or(false, |p| {
                    p.custom_field_types().iter().any(|t| t.eq_ignore_ascii_case(&type_lc))
                });
                if !known {
                    return Err(CompileError::UnknownType {
                        type_name: raw_type.to_string(),
                        position,
                    });
                }
                let params = FieldTypeParameters {
                    byte_order,
                    type_name: type_lc.clone(),
                    extra: token.extra.clone(),
                };
                (FieldType::Custom, Some(params))
            }
        };
        let label = type_lc.as_str();
        let name = token.name.as_deref().map(|n| validate_name(n, position)).transpose()?;

        match field_type {
            FieldType::Align | FieldType::Skip | FieldType::ResetCounter => {
                if token.array.is_some() {
                    return Err(invalid(format!("'{}' can't be an array", label), position));
                }
                if name.is_some() {
                    return Err(invalid(format!("'{}' can't be named", label), position));
                }
            }
            FieldType::Val => {
                if token.array.is_some() {
                    return Err(invalid("'val' can't be an array", position));
                }
                if name.is_none() {
                    return Err(invalid("'val' must be named", position));
                }
                if token.extra.is_none() {
                    return Err(invalid("'val' needs a value", position));
                }
            }
            _ => {}
        }
        if token.extra.is_some() && !field_type.opcode().takes_extra() {
            return Err(invalid(format!("'{}' doesn't take an extra parameter", label), position));
        }

        let offset = self.out.len();
        let mut header = Header::new(field_type.opcode());
        if field_type.is_diff_type() {
            header.ext |= EXT_FLAG_EXTRA_DIFF_TYPE;
        }
        if byte_order == Endianness::Little {
            header.flags |= FLAG_LITTLE_ENDIAN;
        }
        if name.is_some() {
            header.flags |= FLAG_NAMED;
        }

        let array_len = self.array(token.array.as_deref(), position, &mut header)?;
        let extra = self.extra(field_type, token.extra.as_deref(), position, &mut header)?;
        match (field_type, extra) {
            (FieldType::Bit, Some(w)) if !(1..=8).contains(&w) => {
                return Err(invalid(format!("bit width must be 1..=8, got {}", w), position));
            }
            (FieldType::Align, Some(n)) if n <= 0 => {
                return Err(invalid(format!("align size must be positive, got {}", n), position));
            }
            (FieldType::Skip, Some(n)) if n < 0 => {
                return Err(invalid(format!("skip size must not be negative, got {}", n), position));
            }
            _ => {}
        }

        let custom_index = match (custom_params, self.custom) {
            (Some(params), Some(processor)) => {
                if !processor.is_allowed(&params, name.as_deref(), extra, token.array.is_some()) {
                    return Err(invalid(format!("custom type '{}' is not allowed here", label), position));
                }
                self.custom_fields.push(params);
                Some(self.custom_fields.len() - 1)
            }
            _ => None,
        };
        if field_type == FieldType::Var {
            self.has_var_fields = true;
        }
        if let Some(name) = name {
            let numeric = token.array.is_none() && field_type.is_numeric();
            self.register(name, offset, numeric, position)?;
        }

        header.encode(&mut self.out);
        if let Some(n) = array_len {
            pack_int(&mut self.out, n);
        }
        if let Some(x) = extra {
            pack_int(&mut self.out, x as u32);
        }
        if let Some(index) = custom_index {
            pack_int(&mut self.out, index as u32);
        }
        Ok(())
    }

    fn struct_start(&mut self, token: &Token) -> Result<(), CompileError> {
        let position = token.position;
        let name = token.name.as_deref().map(|n| validate_name(n, position)).transpose()?;
        let offset = self.out.len();
        let mut header = Header::new(Opcode::StructStart);
        if name.is_some() {
            header.flags |= FLAG_NAMED;
        }
        let array_len = self.array(token.array.as_deref(), position, &mut header)?;
        if let Some(name) = &name {
            self.register(name.clone(), offset, false, position)?;
        }
        header.encode(&mut self.out);
        if let Some(n) = array_len {
            pack_int(&mut self.out, n);
        }
        self.structs.push(OpenStruct {
            name,
            start_offset: offset,
            named_start: self.named.len(),
            repeated: token.array.is_some(),
            position,
        });
        Ok(())
    }

    fn struct_end(&mut self, token: &Token) -> Result<(), CompileError> {
        let open = self.structs.pop().ok_or(CompileError::UnexpectedStructEnd {
            position: token.position,
        })?;
        Header::new(Opcode::StructEnd).encode(&mut self.out);
        pack_int(&mut self.out, open.start_offset as u32);
        if let Some(prefix) = &open.name {
            for info in &mut self.named[open.named_start..] {
                info.path = format!("{}.{}", prefix, info.path);
            }
        }
        Ok(())
    }

    /// Sets the array flags; returns the literal length of a fixed array.
    fn array(&mut self, text: Option<&str>, position: usize, header: &mut Header) -> Result<Option<u32>, CompileError> {
        let text = match text {
            None => return Ok(None),
            Some(t) => t,
        };
        if text == "_" {
            if self.whole_stream_seen {
                return Err(CompileError::MultipleWholeStreamArrays { position });
            }
            if self.structs.iter().any(|s| s.repeated) {
                return Err(CompileError::WholeStreamInRepeatedStruct { position });
            }
            self.whole_stream_seen = true;
            header.ext |= EXT_FLAG_EXPRESSION_OR_WHOLESTREAM;
            return Ok(None);
        }
        if text.is_empty() {
            return Err(invalid("empty array length", position));
        }
        header.flags |= FLAG_ARRAY;
        if text.bytes().all(|b| b.is_ascii_digit()) {
            let n: u32 = text
                .parse()
                .map_err(|_| invalid(format!("array length '{}' is too large", text), position))?;
            if n == 0 {
                return Err(invalid("array length must be positive", position));
            }
            return Ok(Some(n));
        }
        let expression = self.expression(text, position)?;
        header.ext |= EXT_FLAG_EXPRESSION_OR_WHOLESTREAM;
        self.evaluators.push(expression);
        Ok(None)
    }

    /// Returns the literal extra to emit, if the opcode carries one inline.
    fn extra(
        &mut self,
        field_type: FieldType,
        text: Option<&str>,
        position: usize,
        header: &mut Header,
    ) -> Result<Option<i32>, CompileError> {
        if !field_type.opcode().takes_extra() {
            return Ok(None);
        }
        match text {
            None => Ok(field_type.default_extra()),
            Some(t) if t.starts_with('(') && t.ends_with(')') && t.len() >= 2 => {
                let expression = self.expression(&t[1..t.len() - 1], position)?;
                header.ext |= EXT_FLAG_EXTRA_AS_EXPRESSION;
                self.evaluators.push(expression);
                Ok(None)
            }
            Some(t) => t
                .parse::<i32>()
                .map(Some)
                .map_err(|_| invalid(format!("extra '{}' must be an integer or a (expression)", t), position)),
        }
    }

    fn expression(&self, text: &str, position: usize) -> Result<Expression, CompileError> {
        Expression::compile(text, |name| self.resolve(name)).map_err(|source| CompileError::Expression {
            text: text.to_string(),
            position,
            source,
        })
    }

    /// Look a name up innermost scope first; unknown names are left to the external provider.
    fn resolve(&self, name: &str) -> Result<Option<(usize, String)>, EvalError> {
        let mut bounds = Vec::with_capacity(self.structs.len() + 2);
        bounds.push(0);
        bounds.extend(self.structs.iter().map(|s| s.named_start));
        bounds.push(self.named.len());
        for level in (0..bounds.len() - 1).rev() {
            let found = (bounds[level]..bounds[level + 1]).find(|&i| self.named[i].path == name);
            if let Some(i) = found {
                if !self.numeric[i] {
                    return Err(EvalError::NotNumeric(name.to_string()));
                }
                let info = &self.named[i];
                return Ok(Some((info.offset, info.path.clone())));
            }
        }
        Ok(None)
    }

    fn register(&mut self, name: String, offset: usize, numeric: bool, position: usize) -> Result<(), CompileError> {
        let scope_start = self.structs.last().map_or(0, |s| s.named_start);
        if self.named[scope_start..].iter().any(|f| f.path == name) {
            return Err(CompileError::DuplicateName { name, position });
        }
        self.named.push(NamedFieldInfo::new(name.clone(), name, offset));
        self.numeric.push(numeric);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_paths_are_prefixed_on_close() {
        let block = compile("a { b { int c; } int d; } int e;", None).unwrap();
        let paths: Vec<&str> = block.named_fields().iter().map(|f| f.path()).collect();
        assert_eq!(paths, vec!["a", "a.b", "a.b.c", "a.d", "e"]);
    }

    #[test]
    fn struct_end_carries_start_offset() {
        let block = compile("int x; s { byte y; }", None).unwrap();
        let code = block.bytecode();
        let start = block.find_field_for_path("s").unwrap().offset();
        let mut pos = 0;
        let mut end = None;
        while pos < code.len() {
            let insn = Instruction::decode(code, &mut pos).unwrap();
            if insn.header.opcode == Opcode::StructEnd {
                end = insn.struct_start;
            }
        }
        assert_eq!(end, Some(start as u32));
    }

    #[test]
    fn dotted_name_rejected() {
        assert!(matches!(
            compile("int a.b;", None),
            Err(CompileError::InvalidName { .. })
        ));
    }
}
