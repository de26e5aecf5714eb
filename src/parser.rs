//! Bytecode interpreter: runs a [`CompiledBlock`] against a bit stream.
//!
//! A parse walks the bytecode once per structure body, keeping three cursors (bytecode
//! position, next named field, next evaluator) in one [`Cursors`] value so an element of
//! a structure array can restart the body from a snapshot. Bodies that are not read
//! (zero-length structure arrays, fields after end of data in skip mode) are still walked
//! so the cursors stay in step with the compiler's tables.

use crate::bytecode::{ArrayKind, BytecodeError, Instruction, Opcode};
use crate::codec::{ArrayLimit, BitOrder, BitReader, DynBitReader, Endianness, StreamError};
use crate::compiler::{compile, CompileError, CompiledBlock, NamedFieldInfo};
use crate::expr::{EvalContext, EvalError, ExternalValueProvider};
use crate::field::{ArrayField, FieldNode, PrimitiveField, StructArrayField, StructField};
use crate::processor::{CustomFieldTypeProcessor, VarFieldProcessor};
use crate::value::{ArrayValues, FieldKind, NamedValueMap, Value};
use std::io::Read;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Behaviour switches applied to a whole parse call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ParserFlags(u32);

impl ParserFlags {
    pub const NONE: ParserFlags = ParserFlags(0);
    /// Stop filling a structure, without error, once the stream has no more data.
    pub const SKIP_REMAINING_FIELDS_IF_EOF: ParserFlags = ParserFlags(1);
    /// Clamp negative evaluated array lengths to zero instead of failing.
    pub const NEGATIVE_EXPRESSION_RESULT_AS_ZERO: ParserFlags = ParserFlags(2);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: ParserFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParserFlags {
    type Output = ParserFlags;

    fn bitor(self, rhs: ParserFlags) -> ParserFlags {
        ParserFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ParserFlags {
    fn bitor_assign(&mut self, rhs: ParserFlags) {
        self.0 |= rhs.0;
    }
}

fn describe(path: &Option<String>) -> &str {
    path.as_deref().unwrap_or("<anonymous>")
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{}: {source}", describe(.path))]
    Stream {
        path: Option<String>,
        #[source]
        source: StreamError,
    },
    #[error("{}: whole-stream array exceeds limit of {limit} items", describe(.path))]
    ArrayLimitExceeded { path: Option<String>, limit: usize },
    #[error("{}: negative array length {value}", describe(.path))]
    NegativeArrayLength { path: Option<String>, value: i32 },
    #[error("{}: {source}", describe(.path))]
    Eval {
        path: Option<String>,
        #[source]
        source: EvalError,
    },
    #[error("{}: invalid parameter {value}: {reason}", describe(.path))]
    InvalidExtra {
        path: Option<String>,
        value: i32,
        reason: &'static str,
    },
    #[error("script has var fields but no var field processor is set")]
    MissingVarFieldProcessor,
    #[error("script has custom fields but no custom type processor is set")]
    MissingCustomTypeProcessor,
    #[error("{}: {message}", describe(.path))]
    Processor { path: Option<String>, message: String },
    #[error("corrupt bytecode: {0}")]
    Bytecode(#[from] BytecodeError),
}

impl ParseError {
    /// Path of the field the error is attached to, when it is named.
    pub fn path(&self) -> Option<&str> {
        match self {
            ParseError::Stream { path, .. }
            | ParseError::ArrayLimitExceeded { path, .. }
            | ParseError::NegativeArrayLength { path, .. }
            | ParseError::Eval { path, .. }
            | ParseError::InvalidExtra { path, .. }
            | ParseError::Processor { path, .. } => path.as_deref(),
            _ => None,
        }
    }

    pub fn is_end_of_data(&self) -> bool {
        matches!(self, ParseError::Stream { source, .. } if source.is_end_of_data())
    }

    /// Fill in the field path if the error doesn't have one yet.
    pub fn with_path(mut self, field: Option<&NamedFieldInfo>) -> Self {
        if let (
            ParseError::Stream { path, .. }
            | ParseError::ArrayLimitExceeded { path, .. }
            | ParseError::Eval { path, .. }
            | ParseError::Processor { path, .. },
            Some(info),
        ) = (&mut self, field)
        {
            if path.is_none() {
                *path = Some(info.path().to_string());
            }
        }
        self
    }

    fn stream(source: StreamError, field: Option<&NamedFieldInfo>) -> Self {
        let path = field.map(|f| f.path().to_string());
        match source {
            StreamError::ArrayLimitExceeded { limit } => ParseError::ArrayLimitExceeded { path, limit },
            source => ParseError::Stream { path, source },
        }
    }
}

impl From<StreamError> for ParseError {
    fn from(e: StreamError) -> Self {
        ParseError::stream(e, None)
    }
}

/// Configures and builds a [`Parser`].
#[derive(Default)]
pub struct ParserBuilder {
    bit_order: BitOrder,
    flags: ParserFlags,
    array_limit: ArrayLimit,
    custom_type_processor: Option<Arc<dyn CustomFieldTypeProcessor>>,
    var_field_processor: Option<Arc<dyn VarFieldProcessor>>,
    external_values: Option<Arc<dyn ExternalValueProvider>>,
}

impl ParserBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_order(mut self, bit_order: BitOrder) -> Self {
        self.bit_order = bit_order;
        self
    }

    pub fn flags(mut self, flags: ParserFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Bound for whole-stream arrays (primitive, var, custom and structure arrays).
    pub fn array_limit(mut self, limit: ArrayLimit) -> Self {
        self.array_limit = limit;
        self
    }

    pub fn custom_type_processor(mut self, processor: Arc<dyn CustomFieldTypeProcessor>) -> Self {
        self.custom_type_processor = Some(processor);
        self
    }

    pub fn var_field_processor(mut self, processor: Arc<dyn VarFieldProcessor>) -> Self {
        self.var_field_processor = Some(processor);
        self
    }

    pub fn external_values(mut self, provider: Arc<dyn ExternalValueProvider>) -> Self {
        self.external_values = Some(provider);
        self
    }

    /// Compile `script` (with the custom type processor, if any) and build the parser.
    pub fn build(self, script: &str) -> Result<Parser, CompileError> {
        let block = compile(script, self.custom_type_processor.as_deref())?;
        Ok(self.build_with_block(block))
    }

    pub fn build_with_block(self, block: CompiledBlock) -> Parser {
        Parser {
            block,
            bit_order: self.bit_order,
            flags: self.flags,
            array_limit: self.array_limit,
            custom_type_processor: self.custom_type_processor,
            var_field_processor: self.var_field_processor,
            external_values: self.external_values,
            final_counter: AtomicU64::new(0),
        }
    }
}

/// A compiled script plus parse options. Parsing takes `&self`, so one parser can serve
/// many threads, each with its own stream.
pub struct Parser {
    block: CompiledBlock,
    bit_order: BitOrder,
    flags: ParserFlags,
    array_limit: ArrayLimit,
    custom_type_processor: Option<Arc<dyn CustomFieldTypeProcessor>>,
    var_field_processor: Option<Arc<dyn VarFieldProcessor>>,
    external_values: Option<Arc<dyn ExternalValueProvider>>,
    final_counter: AtomicU64,
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("bit_order", &self.bit_order)
            .field("flags", &self.flags)
            .field("array_limit", &self.array_limit)
            .field("bytecode_len", &self.block.bytecode().len())
            .finish()
    }
}

impl Parser {
    /// Compile `script` with default options.
    pub fn prepare(script: &str) -> Result<Parser, CompileError> {
        ParserBuilder::new().build(script)
    }

    pub fn builder() -> ParserBuilder {
        ParserBuilder::new()
    }

    pub fn block(&self) -> &CompiledBlock {
        &self.block
    }

    pub fn bit_order(&self) -> BitOrder {
        self.bit_order
    }

    pub fn flags(&self) -> ParserFlags {
        self.flags
    }

    pub fn array_limit(&self) -> ArrayLimit {
        self.array_limit
    }

    /// Byte counter of the stream at the end of the most recent successful parse.
    pub fn final_stream_byte_counter(&self) -> u64 {
        self.final_counter.load(Ordering::Relaxed)
    }

    pub fn parse<R: Read>(&self, input: R) -> Result<StructField, ParseError> {
        let mut reader = BitReader::new(input, self.bit_order);
        self.parse_stream(&mut reader)
    }

    pub fn parse_bytes(&self, data: &[u8]) -> Result<StructField, ParseError> {
        self.parse(data)
    }

    /// Parse from an existing reader, which keeps its position and counter afterwards.
    pub fn parse_stream<R: Read>(&self, input: &mut BitReader<R>) -> Result<StructField, ParseError> {
        if self.block.has_var_fields() && self.var_field_processor.is_none() {
            return Err(ParseError::MissingVarFieldProcessor);
        }
        if !self.block.custom_fields().is_empty() && self.custom_type_processor.is_none() {
            return Err(ParseError::MissingCustomTypeProcessor);
        }
        let stream: &mut DynBitReader<'_> = input;
        let mut session = Session {
            parser: self,
            code: self.block.bytecode(),
            stream,
            cursors: Cursors::default(),
            values: NamedValueMap::default(),
            track_values: self.block.has_evaluators() || self.block.has_var_fields(),
            limit_fired: false,
        };
        let (fields, end) = session.parse_body(false)?;
        if let Some(start) = end {
            return Err(BytecodeError::UnbalancedStructEnd(start).into());
        }
        let counter = session.stream.counter();
        self.final_counter.store(counter, Ordering::Relaxed);
        tracing::debug!(fields = fields.len(), counter, "parsed block");
        Ok(StructField::new(None, fields))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Cursors {
    code: usize,
    named: usize,
    evaluator: usize,
}

#[derive(Debug, Clone, Copy)]
enum Count {
    Single,
    Items(usize),
    WholeStream,
}

impl Count {
    fn is_array(self) -> bool {
        !matches!(self, Count::Single)
    }

    /// Element count handed to the codec and processors; `None` reads to end of stream.
    fn items(self) -> Option<usize> {
        match self {
            Count::Items(n) => Some(n),
            _ => None,
        }
    }
}

struct Session<'p, 's, 'r> {
    parser: &'p Parser,
    code: &'p [u8],
    stream: &'s mut DynBitReader<'r>,
    cursors: Cursors,
    values: NamedValueMap,
    track_values: bool,
    limit_fired: bool,
}

impl<'p, 's, 'r> Session<'p, 's, 'r> {
    /// Run instructions up to the next STRUCT_END (returning the start offset it carries)
    /// or the end of the bytecode.
    fn parse_body(&mut self, mut skip: bool) -> Result<(Vec<FieldNode>, Option<usize>), ParseError> {
        let mut fields = Vec::new();
        while self.cursors.code < self.code.len() {
            let insn = Instruction::decode(self.code, &mut self.cursors.code)?;
            let header = insn.header;
            if header.opcode == Opcode::StructEnd {
                let start = insn
                    .struct_start
                    .ok_or(BytecodeError::UnbalancedStructEnd(insn.offset))?;
                return Ok((fields, Some(start as usize)));
            }
            let info = if header.is_named() {
                Some(self.next_named(insn.offset)?)
            } else {
                None
            };
            let length_expr = match header.array_kind() {
                ArrayKind::Expression => Some(self.next_evaluator(insn.offset)?),
                _ => None,
            };
            let extra_expr = if header.opcode.takes_extra() && header.extra_is_expression() {
                Some(self.next_evaluator(insn.offset)?)
            } else {
                None
            };

            if !skip && self.stop_on_eof()? {
                tracing::debug!(offset = insn.offset, "end of data, skipping remaining fields");
                skip = true;
            }
            if skip {
                if header.opcode == Opcode::StructStart {
                    let (_, end) = self.parse_body(true)?;
                    check_end(end, insn.offset)?;
                }
                continue;
            }

            let count = match header.array_kind() {
                ArrayKind::Single => Count::Single,
                ArrayKind::Fixed => Count::Items(insn.array_len.unwrap_or(0) as usize),
                ArrayKind::WholeStream => Count::WholeStream,
                ArrayKind::Expression => match length_expr {
                    Some(index) => Count::Items(self.eval_length(index, info)?),
                    None => Count::Items(0),
                },
            };
            let extra = match extra_expr {
                Some(index) => self.eval(index, info)?,
                None => insn.extra.map_or(0, |x| x as i32),
            };
            let order = if header.is_little_endian() {
                Endianness::Little
            } else {
                Endianness::Big
            };
            let diff = header.is_diff_type();

            let node = match header.opcode {
                Opcode::StructStart => Some(self.structure(insn.offset, count, info)?),
                Opcode::Align => {
                    if extra <= 0 {
                        return Err(invalid_extra(info, extra, "align size must be positive"));
                    }
                    self.stream
                        .align(extra as u64)
                        .map_err(|e| ParseError::stream(e, info))?;
                    None
                }
                Opcode::Skip if diff => Some(FieldNode::Primitive(PrimitiveField {
                    info: info.cloned(),
                    value: Value::Int(extra),
                })),
                Opcode::Skip => {
                    if extra < 0 {
                        return Err(invalid_extra(info, extra, "skip size must not be negative"));
                    }
                    let skipped = self.stream.skip(extra as u64).map_err(|e| ParseError::stream(e, info))?;
                    if skipped != extra as u64 {
                        let source = StreamError::EndOfData {
                            requested: extra as usize,
                            read: skipped as usize,
                        };
                        return Err(ParseError::stream(source, info));
                    }
                    None
                }
                Opcode::ResetCounter => {
                    self.stream.reset_counter();
                    None
                }
                Opcode::Var => Some(self.var_field(info, count, extra, order)?),
                Opcode::CustomType => {
                    let index = insn.custom_index.ok_or(BytecodeError::MissingCustomType(insn.offset))?;
                    Some(self.custom_field(insn.offset, index as usize, info, count, extra)?)
                }
                Opcode::StructEnd => None,
                Opcode::Bit
                | Opcode::Bool
                | Opcode::UByte
                | Opcode::Byte
                | Opcode::UShort
                | Opcode::Short
                | Opcode::Int
                | Opcode::Long => {
                    let kind = primitive_kind(header.opcode, diff).ok_or(BytecodeError::UnknownOpcode {
                        code: header.opcode.code(),
                        offset: insn.offset,
                    })?;
                    Some(self.primitive(kind, order, count, extra, info)?)
                }
            };
            if let Some(node) = node {
                self.record(&node);
                fields.push(node);
            }
        }
        Ok((fields, None))
    }

    fn stop_on_eof(&mut self) -> Result<bool, ParseError> {
        if !self.parser.flags.contains(ParserFlags::SKIP_REMAINING_FIELDS_IF_EOF) || self.limit_fired {
            return Ok(false);
        }
        Ok(!self.stream.has_available_data()?)
    }

    fn next_named(&mut self, offset: usize) -> Result<&'p NamedFieldInfo, ParseError> {
        let info = self
            .parser
            .block
            .named_fields()
            .get(self.cursors.named)
            .filter(|f| f.offset() == offset)
            .ok_or(BytecodeError::NamedFieldMismatch(offset))?;
        self.cursors.named += 1;
        Ok(info)
    }

    fn next_evaluator(&mut self, offset: usize) -> Result<usize, ParseError> {
        let index = self.cursors.evaluator;
        if index >= self.parser.block.evaluators().len() {
            return Err(BytecodeError::MissingEvaluator(offset).into());
        }
        self.cursors.evaluator += 1;
        Ok(index)
    }

    fn eval(&mut self, index: usize, info: Option<&NamedFieldInfo>) -> Result<i32, ParseError> {
        let parser = self.parser;
        let ctx = EvalContext {
            stream_offset: self.stream.counter(),
            block: &parser.block,
            values: &self.values,
            external: parser.external_values.as_deref(),
        };
        parser.block.evaluators()[index]
            .eval(&ctx)
            .map_err(|source| ParseError::Eval {
                path: info.map(|f| f.path().to_string()),
                source,
            })
    }

    fn eval_length(&mut self, index: usize, info: Option<&NamedFieldInfo>) -> Result<usize, ParseError> {
        let value = self.eval(index, info)?;
        if value >= 0 {
            Ok(value as usize)
        } else if self.parser.flags.contains(ParserFlags::NEGATIVE_EXPRESSION_RESULT_AS_ZERO) {
            Ok(0)
        } else {
            Err(ParseError::NegativeArrayLength {
                path: info.map(|f| f.path().to_string()),
                value,
            })
        }
    }

    /// Remember named numeric scalars for later expressions and var processors.
    fn record(&mut self, node: &FieldNode) {
        if !self.track_values {
            return;
        }
        if let (Some(info), Some(v)) = (node.info(), node.as_value().and_then(Value::as_i32)) {
            self.values.set(info.offset(), v);
        }
    }

    /// After a whole-stream read, note whether the limiter cut it short.
    fn note_limit(&mut self, count: Count) -> Result<(), ParseError> {
        if matches!(count, Count::WholeStream)
            && self.parser.array_limit != ArrayLimit::Unlimited
            && self.stream.has_available_data()?
        {
            tracing::debug!(limit = ?self.parser.array_limit, "whole-stream array cut by limit");
            self.limit_fired = true;
        }
        Ok(())
    }

    fn structure(
        &mut self,
        offset: usize,
        count: Count,
        info: Option<&'p NamedFieldInfo>,
    ) -> Result<FieldNode, ParseError> {
        if let Count::Single = count {
            let (fields, end) = self.parse_body(false)?;
            check_end(end, offset)?;
            return Ok(FieldNode::Struct(StructField::new(info.cloned(), fields)));
        }

        let body = self.cursors;
        let mut elements = Vec::new();
        let mut after: Option<Cursors> = None;
        loop {
            let more = match count {
                Count::Items(n) => elements.len() < n && !self.stop_on_eof()?,
                _ => {
                    if !self.stream.has_available_data()? {
                        false
                    } else if !self
                        .parser
                        .array_limit
                        .admit(elements.len())
                        .map_err(|e| ParseError::stream(e, info))?
                    {
                        tracing::debug!(offset, elements = elements.len(), "structure array cut by limit");
                        self.limit_fired = true;
                        false
                    } else {
                        true
                    }
                }
            };
            if !more {
                break;
            }
            self.cursors = body;
            let start = self.stream.bit_position();
            let (fields, end) = self.parse_body(false)?;
            check_end(end, offset)?;
            elements.push(StructField::new(info.cloned(), fields));
            after = Some(self.cursors);
            if matches!(count, Count::WholeStream) && self.stream.bit_position() == start {
                tracing::debug!(offset, "structure array element read no data, stopping");
                break;
            }
        }
        match after {
            Some(cursors) => self.cursors = cursors,
            None => {
                let (_, end) = self.parse_body(true)?;
                check_end(end, offset)?;
            }
        }
        tracing::trace!(offset, elements = elements.len(), "structure array");
        Ok(FieldNode::StructArray(StructArrayField {
            info: info.cloned(),
            elements,
        }))
    }

    fn primitive(
        &mut self,
        kind: FieldKind,
        order: Endianness,
        count: Count,
        extra: i32,
        info: Option<&NamedFieldInfo>,
    ) -> Result<FieldNode, ParseError> {
        if kind == FieldKind::Bit && !(1..=8).contains(&extra) {
            return Err(invalid_extra(info, extra, "bit width must be 1..=8"));
        }
        let node = if count.is_array() {
            let values = self
                .read_array(kind, order, extra as u32, count.items())
                .map_err(|e| ParseError::stream(e, info))?;
            self.note_limit(count)?;
            FieldNode::Array(ArrayField {
                info: info.cloned(),
                values,
            })
        } else {
            let value = self
                .read_value(kind, order, extra as u32)
                .map_err(|e| ParseError::stream(e, info))?;
            FieldNode::Primitive(PrimitiveField {
                info: info.cloned(),
                value,
            })
        };
        Ok(node)
    }

    fn read_value(&mut self, kind: FieldKind, order: Endianness, width: u32) -> Result<Value, StreamError> {
        let s = &mut *self.stream;
        Ok(match kind {
            FieldKind::Bit => Value::Bit(s.read_bits(width)?),
            FieldKind::Bool => Value::Bool(s.read_bool()?),
            FieldKind::String => Value::String(s.read_string(order)?),
            FieldKind::UByte => Value::UByte(s.read_u8()?),
            FieldKind::Byte => Value::Byte(s.read_i8()?),
            FieldKind::UInt => Value::UInt(s.read_u32(order)?),
            FieldKind::UShort => Value::UShort(s.read_u16(order)?),
            FieldKind::Short => Value::Short(s.read_i16(order)?),
            FieldKind::Int => Value::Int(s.read_i32(order)?),
            FieldKind::Float => Value::Float(s.read_f32(order)?),
            FieldKind::Long => Value::Long(s.read_i64(order)?),
            FieldKind::Double => Value::Double(s.read_f64(order)?),
        })
    }

    fn read_array(
        &mut self,
        kind: FieldKind,
        order: Endianness,
        width: u32,
        count: Option<usize>,
    ) -> Result<ArrayValues, StreamError> {
        let limit = self.parser.array_limit;
        let s = &mut *self.stream;
        Ok(match kind {
            FieldKind::Bit => ArrayValues::Bit(s.read_bits_array(width, count, limit)?),
            FieldKind::Bool => ArrayValues::Bool(s.read_bool_array(count, limit)?),
            FieldKind::String => ArrayValues::String(s.read_string_array(order, count, limit)?),
            FieldKind::UByte => ArrayValues::UByte(s.read_u8_array(count, limit)?),
            FieldKind::Byte => ArrayValues::Byte(s.read_i8_array(count, limit)?),
            FieldKind::UInt => ArrayValues::UInt(s.read_u32_array(order, count, limit)?),
            FieldKind::UShort => ArrayValues::UShort(s.read_u16_array(order, count, limit)?),
            FieldKind::Short => ArrayValues::Short(s.read_i16_array(order, count, limit)?),
            FieldKind::Int => ArrayValues::Int(s.read_i32_array(order, count, limit)?),
            FieldKind::Float => ArrayValues::Float(s.read_f32_array(order, count, limit)?),
            FieldKind::Long => ArrayValues::Long(s.read_i64_array(order, count, limit)?),
            FieldKind::Double => ArrayValues::Double(s.read_f64_array(order, count, limit)?),
        })
    }

    fn var_field(
        &mut self,
        info: Option<&NamedFieldInfo>,
        count: Count,
        extra: i32,
        order: Endianness,
    ) -> Result<FieldNode, ParseError> {
        let processor = self
            .parser
            .var_field_processor
            .as_deref()
            .ok_or(ParseError::MissingVarFieldProcessor)?;
        let node = if count.is_array() {
            processor.read_var_array(
                &mut *self.stream,
                count.items(),
                info,
                extra,
                order,
                &self.values,
                self.parser.array_limit,
            )
        } else {
            processor.read_var_field(&mut *self.stream, info, extra, order, &self.values)
        }
        .map_err(|e| e.with_path(info))?;
        check_processor_node(&node, info, count.is_array())?;
        self.note_limit(count)?;
        Ok(node)
    }

    fn custom_field(
        &mut self,
        offset: usize,
        index: usize,
        info: Option<&NamedFieldInfo>,
        count: Count,
        extra: i32,
    ) -> Result<FieldNode, ParseError> {
        let parser = self.parser;
        let processor = parser
            .custom_type_processor
            .as_deref()
            .ok_or(ParseError::MissingCustomTypeProcessor)?;
        let field_type = parser
            .block
            .custom_fields()
            .get(index)
            .ok_or(BytecodeError::MissingCustomType(offset))?;
        let node = processor
            .read_custom_field_type(
                &mut *self.stream,
                parser.bit_order,
                parser.flags,
                field_type,
                info,
                extra,
                matches!(count, Count::WholeStream),
                count.items(),
            )
            .map_err(|e| e.with_path(info))?;
        check_processor_node(&node, info, count.is_array())?;
        self.note_limit(count)?;
        Ok(node)
    }
}

/// Value kind an opcode reads; `diff` selects the alternate reading.
fn primitive_kind(opcode: Opcode, diff: bool) -> Option<FieldKind> {
    Some(match (opcode, diff) {
        (Opcode::Bit, _) => FieldKind::Bit,
        (Opcode::Bool, false) => FieldKind::Bool,
        (Opcode::Bool, true) => FieldKind::String,
        (Opcode::UByte, _) => FieldKind::UByte,
        (Opcode::Byte, false) => FieldKind::Byte,
        (Opcode::Byte, true) => FieldKind::UInt,
        (Opcode::UShort, _) => FieldKind::UShort,
        (Opcode::Short, _) => FieldKind::Short,
        (Opcode::Int, false) => FieldKind::Int,
        (Opcode::Int, true) => FieldKind::Float,
        (Opcode::Long, false) => FieldKind::Long,
        (Opcode::Long, true) => FieldKind::Double,
        (
            Opcode::Align
            | Opcode::StructStart
            | Opcode::StructEnd
            | Opcode::Skip
            | Opcode::Var
            | Opcode::ResetCounter
            | Opcode::CustomType,
            _,
        ) => return None,
    })
}

fn invalid_extra(info: Option<&NamedFieldInfo>, value: i32, reason: &'static str) -> ParseError {
    ParseError::InvalidExtra {
        path: info.map(|f| f.path().to_string()),
        value,
        reason,
    }
}

fn check_end(end: Option<usize>, start: usize) -> Result<(), BytecodeError> {
    match end {
        Some(found) if found == start => Ok(()),
        Some(found) => Err(BytecodeError::StructMismatch {
            offset: start,
            expected: start,
            found,
        }),
        None => Err(BytecodeError::UnterminatedStruct(start)),
    }
}

fn check_processor_node(
    node: &FieldNode,
    info: Option<&NamedFieldInfo>,
    is_array: bool,
) -> Result<(), ParseError> {
    let path = info.map(|f| f.path().to_string());
    if node.info() != info {
        return Err(ParseError::Processor {
            path,
            message: format!(
                "processor returned field '{}'",
                node.path().unwrap_or("<anonymous>")
            ),
        });
    }
    if node.is_array_shaped() != is_array {
        let message = if is_array {
            "processor returned a single value for an array field"
        } else {
            "processor returned an array for a single field"
        };
        return Err(ParseError::Processor {
            path,
            message: message.to_string(),
        });
    }
    Ok(())
}
