//! Runtime values produced by the interpreter.

use crate::compiler::NamedFieldInfo;
use std::collections::HashMap;
use std::fmt;

/// Primitive kinds understood by the DSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
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
}

impl FieldKind {
    /// The DSL type name.
    pub fn type_name(self) -> &'static str {
        match self {
            FieldKind::Bit => "bit",
            FieldKind::Bool => "bool",
            FieldKind::Byte => "byte",
            FieldKind::UByte => "ubyte",
            FieldKind::Short => "short",
            FieldKind::UShort => "ushort",
            FieldKind::Int => "int",
            FieldKind::UInt => "uint",
            FieldKind::Long => "long",
            FieldKind::Float => "floatj",
            FieldKind::Double => "doublej",
            FieldKind::String => "stringj",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A single decoded scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 1..=8 bit field, always in `0..2^width`.
    Bit(u8),
    Bool(bool),
    Byte(i8),
    UByte(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// `None` is the encoded null string.
    String(Option<String>),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Bit(_) => FieldKind::Bit,
            Value::Bool(_) => FieldKind::Bool,
            Value::Byte(_) => FieldKind::Byte,
            Value::UByte(_) => FieldKind::UByte,
            Value::Short(_) => FieldKind::Short,
            Value::UShort(_) => FieldKind::UShort,
            Value::Int(_) => FieldKind::Int,
            Value::UInt(_) => FieldKind::UInt,
            Value::Long(_) => FieldKind::Long,
            Value::Float(_) => FieldKind::Float,
            Value::Double(_) => FieldKind::Double,
            Value::String(_) => FieldKind::String,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bit(x) => Some(*x as i64),
            Value::Bool(x) => Some(*x as i64),
            Value::Byte(x) => Some(*x as i64),
            Value::UByte(x) => Some(*x as i64),
            Value::Short(x) => Some(*x as i64),
            Value::UShort(x) => Some(*x as i64),
            Value::Int(x) => Some(*x as i64),
            Value::UInt(x) => Some(*x as i64),
            Value::Long(x) => Some(*x),
            Value::Float(x) => Some(x.round() as i64),
            Value::Double(x) => Some(x.round() as i64),
            Value::String(_) => None,
        }
    }

    /// Value as seen by expressions: 32-bit, wider values truncated.
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().map(|v| v as i32)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Bit(x) => Some(*x as u64),
            Value::Bool(x) => Some(*x as u64),
            Value::UByte(x) => Some(*x as u64),
            Value::UShort(x) => Some(*x as u64),
            Value::UInt(x) => Some(*x as u64),
            Value::Byte(_) | Value::Short(_) | Value::Int(_) | Value::Long(_) => {
                self.as_i64().and_then(|v| v.try_into().ok())
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            Value::String(_) => None,
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => s.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bit(x) => write!(f, "{}", x),
            Value::Bool(x) => write!(f, "{}", x),
            Value::Byte(x) => write!(f, "{}", x),
            Value::UByte(x) => write!(f, "{}", x),
            Value::Short(x) => write!(f, "{}", x),
            Value::UShort(x) => write!(f, "{}", x),
            Value::Int(x) => write!(f, "{}", x),
            Value::UInt(x) => write!(f, "{}", x),
            Value::Long(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::String(Some(s)) => write!(f, "{:?}", s),
            Value::String(None) => f.write_str("null"),
        }
    }
}

/// Values of a primitive array, one vector per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValues {
    Bit(Vec<u8>),
    Bool(Vec<bool>),
    Byte(Vec<i8>),
    UByte(Vec<u8>),
    Short(Vec<i16>),
    UShort(Vec<u16>),
    Int(Vec<i32>),
    UInt(Vec<u32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<Option<String>>),
}

impl ArrayValues {
    pub fn kind(&self) -> FieldKind {
        match self {
            ArrayValues::Bit(_) => FieldKind::Bit,
            ArrayValues::Bool(_) => FieldKind::Bool,
            ArrayValues::Byte(_) => FieldKind::Byte,
            ArrayValues::UByte(_) => FieldKind::UByte,
            ArrayValues::Short(_) => FieldKind::Short,
            ArrayValues::UShort(_) => FieldKind::UShort,
            ArrayValues::Int(_) => FieldKind::Int,
            ArrayValues::UInt(_) => FieldKind::UInt,
            ArrayValues::Long(_) => FieldKind::Long,
            ArrayValues::Float(_) => FieldKind::Float,
            ArrayValues::Double(_) => FieldKind::Double,
            ArrayValues::String(_) => FieldKind::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Bit(v) => v.len(),
            ArrayValues::Bool(v) => v.len(),
            ArrayValues::Byte(v) => v.len(),
            ArrayValues::UByte(v) => v.len(),
            ArrayValues::Short(v) => v.len(),
            ArrayValues::UShort(v) => v.len(),
            ArrayValues::Int(v) => v.len(),
            ArrayValues::UInt(v) => v.len(),
            ArrayValues::Long(v) => v.len(),
            ArrayValues::Float(v) => v.len(),
            ArrayValues::Double(v) => v.len(),
            ArrayValues::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<Value> {
        Some(match self {
            ArrayValues::Bit(v) => Value::Bit(*v.get(i)?),
            ArrayValues::Bool(v) => Value::Bool(*v.get(i)?),
            ArrayValues::Byte(v) => Value::Byte(*v.get(i)?),
            ArrayValues::UByte(v) => Value::UByte(*v.get(i)?),
            ArrayValues::Short(v) => Value::Short(*v.get(i)?),
            ArrayValues::UShort(v) => Value::UShort(*v.get(i)?),
            ArrayValues::Int(v) => Value::Int(*v.get(i)?),
            ArrayValues::UInt(v) => Value::UInt(*v.get(i)?),
            ArrayValues::Long(v) => Value::Long(*v.get(i)?),
            ArrayValues::Float(v) => Value::Float(*v.get(i)?),
            ArrayValues::Double(v) => Value::Double(*v.get(i)?),
            ArrayValues::String(v) => Value::String(v.get(i)?.clone()),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

/// Numeric values of named fields parsed so far, keyed by the field's bytecode offset.
/// Consulted by expressions and handed to var-field processors.
#[derive(Debug, Clone, Default)]
pub struct NamedValueMap {
    values: HashMap<usize, i32>,
}

impl NamedValueMap {
    pub fn get(&self, offset: usize) -> Option<i32> {
        self.values.get(&offset).copied()
    }

    pub fn get_for(&self, field: &NamedFieldInfo) -> Option<i32> {
        self.get(field.offset())
    }

    pub fn set(&mut self, offset: usize, value: i32) {
        self.values.insert(offset, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
