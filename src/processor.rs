//! Extension points: custom field types and `var` fields.
//!
//! Both are consumed as trait objects. The interpreter checks every node they return:
//! its name must be the declared one and its shape (scalar vs array) must match the
//! declaration.

use crate::codec::{ArrayLimit, BitOrder, DynBitReader, Endianness};
use crate::compiler::NamedFieldInfo;
use crate::field::FieldNode;
use crate::parser::{ParseError, ParserFlags};
use crate::value::NamedValueMap;

/// Type declaration of a custom field as written in the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTypeParameters {
    pub byte_order: Endianness,
    /// Lowercased type name.
    pub type_name: String,
    /// Raw text after `:` (a literal or a parenthesised expression), if any.
    pub extra: Option<String>,
}

/// Handles type names the DSL doesn't know.
pub trait CustomFieldTypeProcessor: Send + Sync {
    /// Accepted type names (compared case-insensitively).
    fn custom_field_types(&self) -> &[&str];

    /// Compile-time admission. `extra` is `None` when given as an expression.
    fn is_allowed(
        &self,
        field_type: &FieldTypeParameters,
        field_name: Option<&str>,
        extra: Option<i32>,
        is_array: bool,
    ) -> bool;

    /// Read one value or an array. `array_length` is `None` for scalars and whole-stream
    /// arrays; `read_whole_stream` marks the latter.
    #[allow(clippy::too_many_arguments)]
    fn read_custom_field_type(
        &self,
        input: &mut DynBitReader<'_>,
        bit_order: BitOrder,
        parser_flags: ParserFlags,
        field_type: &FieldTypeParameters,
        field: Option<&NamedFieldInfo>,
        extra: i32,
        read_whole_stream: bool,
        array_length: Option<usize>,
    ) -> Result<FieldNode, ParseError>;
}

/// Decodes `var` fields.
pub trait VarFieldProcessor: Send + Sync {
    fn read_var_field(
        &self,
        input: &mut DynBitReader<'_>,
        field: Option<&NamedFieldInfo>,
        extra: i32,
        byte_order: Endianness,
        values: &NamedValueMap,
    ) -> Result<FieldNode, ParseError>;

    /// `size` is `None` for a whole-stream array, which must honour `limit`.
    #[allow(clippy::too_many_arguments)]
    fn read_var_array(
        &self,
        input: &mut DynBitReader<'_>,
        size: Option<usize>,
        field: Option<&NamedFieldInfo>,
        extra: i32,
        byte_order: Endianness,
        values: &NamedValueMap,
        limit: ArrayLimit,
    ) -> Result<FieldNode, ParseError>;
}
