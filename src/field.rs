//! The typed result tree returned by [`Parser::parse`](crate::parser::Parser::parse).
//!
//! The root is always an anonymous [`StructField`]. Named nodes carry their
//! [`NamedFieldInfo`]; anonymous nodes are reachable only by position or type.

use crate::compiler::NamedFieldInfo;
use crate::processor::FieldTypeParameters;
use crate::value::{ArrayValues, FieldKind, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveField {
    pub info: Option<NamedFieldInfo>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayField {
    pub info: Option<NamedFieldInfo>,
    pub values: ArrayValues,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructField {
    pub info: Option<NamedFieldInfo>,
    pub fields: Vec<FieldNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructArrayField {
    pub info: Option<NamedFieldInfo>,
    pub elements: Vec<StructField>,
}

/// Payload produced by a custom type processor.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomPayload {
    Scalar(Value),
    Array(ArrayValues),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomField {
    pub info: Option<NamedFieldInfo>,
    pub type_params: FieldTypeParameters,
    pub payload: CustomPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldNode {
    Primitive(PrimitiveField),
    Array(ArrayField),
    Struct(StructField),
    StructArray(StructArrayField),
    Custom(CustomField),
}

/// Node type used by the type-based lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Primitive(FieldKind),
    Array(FieldKind),
    Struct,
    StructArray,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldLookupError {
    #[error("more than one field matches {0}")]
    Ambiguous(String),
}

impl FieldNode {
    pub fn info(&self) -> Option<&NamedFieldInfo> {
        match self {
            FieldNode::Primitive(f) => f.info.as_ref(),
            FieldNode::Array(f) => f.info.as_ref(),
            FieldNode::Struct(f) => f.info.as_ref(),
            FieldNode::StructArray(f) => f.info.as_ref(),
            FieldNode::Custom(f) => f.info.as_ref(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.info().map(NamedFieldInfo::name)
    }

    pub fn path(&self) -> Option<&str> {
        self.info().map(NamedFieldInfo::path)
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            FieldNode::Primitive(f) => NodeType::Primitive(f.value.kind()),
            FieldNode::Array(f) => NodeType::Array(f.values.kind()),
            FieldNode::Struct(_) => NodeType::Struct,
            FieldNode::StructArray(_) => NodeType::StructArray,
            FieldNode::Custom(_) => NodeType::Custom,
        }
    }

    /// True for nodes a processor may return for an array declaration.
    pub fn is_array_shaped(&self) -> bool {
        match self {
            FieldNode::Array(_) | FieldNode::StructArray(_) => true,
            FieldNode::Custom(c) => matches!(c.payload, CustomPayload::Array(_)),
            FieldNode::Primitive(_) | FieldNode::Struct(_) => false,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldNode::Primitive(f) => Some(&f.value),
            FieldNode::Custom(CustomField { payload: CustomPayload::Scalar(v), .. }) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValues> {
        match self {
            FieldNode::Array(f) => Some(&f.values),
            FieldNode::Custom(CustomField { payload: CustomPayload::Array(v), .. }) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructField> {
        match self {
            FieldNode::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct_array(&self) -> Option<&StructArrayField> {
        match self {
            FieldNode::StructArray(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_custom(&self) -> Option<&CustomField> {
        match self {
            FieldNode::Custom(c) => Some(c),
            _ => None,
        }
    }
}

impl StructField {
    pub fn new(info: Option<NamedFieldInfo>, fields: Vec<FieldNode>) -> Self {
        StructField { info, fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Walk a dotted path one segment at a time through nested structures.
    pub fn find_field_for_path(&self, path: &str) -> Option<&FieldNode> {
        let path = path.trim().to_ascii_lowercase();
        let mut current = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let found = current.fields.iter().find(|f| f.name() == Some(segment))?;
            if segments.peek().is_none() {
                return Some(found);
            }
            current = found.as_struct()?;
        }
        None
    }

    /// Immediate child with the given simple name.
    pub fn find_field_for_name(&self, name: &str) -> Option<&FieldNode> {
        let name = name.trim().to_ascii_lowercase();
        self.fields.iter().find(|f| f.name() == Some(name.as_str()))
    }

    /// Immediate child with the given name and type; ambiguous matches are an error.
    pub fn find_field_for_name_and_type(
        &self,
        name: &str,
        node_type: NodeType,
    ) -> Result<Option<&FieldNode>, FieldLookupError> {
        let name = name.trim().to_ascii_lowercase();
        let mut matches = self
            .fields
            .iter()
            .filter(|f| f.name() == Some(name.as_str()) && f.node_type() == node_type);
        let first = matches.next();
        if first.is_some() && matches.next().is_some() {
            return Err(FieldLookupError::Ambiguous(format!("{} of {:?}", name, node_type)));
        }
        Ok(first)
    }

    /// The only immediate child of the given type.
    pub fn find_field_for_type(&self, node_type: NodeType) -> Result<Option<&FieldNode>, FieldLookupError> {
        let mut matches = self.fields.iter().filter(|f| f.node_type() == node_type);
        let first = matches.next();
        if first.is_some() && matches.next().is_some() {
            return Err(FieldLookupError::Ambiguous(format!("{:?}", node_type)));
        }
        Ok(first)
    }

    pub fn find_first_field_for_type(&self, node_type: NodeType) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.node_type() == node_type)
    }

    pub fn find_last_field_for_type(&self, node_type: NodeType) -> Option<&FieldNode> {
        self.fields.iter().rev().find(|f| f.node_type() == node_type)
    }

    pub fn path_exists(&self, path: &str) -> bool {
        self.find_field_for_path(path).is_some()
    }

    pub fn name_exists(&self, name: &str) -> bool {
        self.find_field_for_name(name).is_some()
    }

    /// Scalar value at `path`, if the node there has one.
    pub fn value_for_path(&self, path: &str) -> Option<&Value> {
        self.find_field_for_path(path).and_then(FieldNode::as_value)
    }
}

impl StructArrayField {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
