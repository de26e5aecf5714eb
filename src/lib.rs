//! # binblock - binary block parser driven by a layout script
//!
//! Describe a binary layout (packet, file format, protocol frame) with a small script,
//! compile it once into compact bytecode and run that bytecode against byte or bit level
//! input to get a typed tree of values.
//!
//! ## Pieces
//!
//! - **codec**: [`BitReader`] / [`BitWriter`], 1..=8 bit fields, both bit orders, both byte
//!   orders, byte counter, align/skip and "read to end of stream" arrays
//! - **expr**: integer expressions for data-dependent lengths (`n*2`, `header.len-4`, `$$`)
//! - **compiler**: script to [`CompiledBlock`] (PEST grammar in `grammar.pest`)
//! - **parser**: the bytecode interpreter, [`Parser`]
//! - **field**: the result tree ([`StructField`], [`FieldNode`]) and its lookups
//!
//! ## Script syntax
//!
//! ```text
//! [<|>]type[:extra] ['[' length ']'] [name];     // field
//! [name] ['[' length ']'] { ... }                // structure
//! ```
//!
//! Types: `bit`, `bool`, `byte`, `ubyte`, `short`, `ushort`, `int`, `uint`, `long`,
//! `floatj`, `doublej`, `stringj`, plus the directives `align`, `skip`, `val`, `reset$$`
//! and the processor-backed `var` and custom types. `<` selects little endian.
//! `length` is a literal, an expression or `_` (until end of stream).
//!
//! ## Example
//!
//! ```
//! use binblock::Parser;
//!
//! let parser = Parser::prepare("header { ubyte n; } items [header.n] { byte v; }").unwrap();
//! let root = parser.parse_bytes(&[2, 5, 9]).unwrap();
//! let items = root.find_field_for_path("items").unwrap().as_struct_array().unwrap();
//! assert_eq!(items.len(), 2);
//! ```

pub mod bytecode;
pub mod codec;
pub mod compiler;
pub mod dump;
pub mod expr;
pub mod field;
pub mod parser;
pub mod processor;
mod tokenizer;
pub mod value;

pub use codec::{ArrayLimit, BitOrder, BitReader, BitWriter, DynBitReader, Endianness, StreamError};
pub use compiler::{compile, CompileError, CompiledBlock, NamedFieldInfo};
pub use expr::{EvalContext, EvalError, Expression, ExternalValueProvider};
pub use field::{
    ArrayField, CustomField, CustomPayload, FieldLookupError, FieldNode, NodeType, PrimitiveField,
    StructArrayField, StructField,
};
pub use parser::{ParseError, Parser, ParserBuilder, ParserFlags};
pub use processor::{CustomFieldTypeProcessor, FieldTypeParameters, VarFieldProcessor};
pub use value::{ArrayValues, FieldKind, NamedValueMap, Value};
