//! Runtime type tags and static type facts.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Value;

/// The type tag of a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Null,
    Missing,
    Bool,
    Int,
    Float,
    Decimal,
    Date,
    Time,
    TimeWithZone,
    Timestamp,
    Symbol,
    String,
    Clob,
    Blob,
    List,
    Sexp,
    Struct,
    Bag,
}

impl ValueType {
    pub fn is_unknown(self) -> bool {
        matches!(self, ValueType::Null | ValueType::Missing)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float | ValueType::Decimal)
    }

    pub fn is_text(self) -> bool {
        matches!(self, ValueType::String | ValueType::Symbol)
    }

    pub fn is_sequence(self) -> bool {
        matches!(self, ValueType::List | ValueType::Sexp | ValueType::Bag)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "NULL",
            ValueType::Missing => "MISSING",
            ValueType::Bool => "BOOL",
            ValueType::Int => "INT",
            ValueType::Float => "FLOAT",
            ValueType::Decimal => "DECIMAL",
            ValueType::Date => "DATE",
            ValueType::Time => "TIME",
            ValueType::TimeWithZone => "TIME WITH TIME ZONE",
            ValueType::Timestamp => "TIMESTAMP",
            ValueType::Symbol => "SYMBOL",
            ValueType::String => "STRING",
            ValueType::Clob => "CLOB",
            ValueType::Blob => "BLOB",
            ValueType::List => "LIST",
            ValueType::Sexp => "SEXP",
            ValueType::Struct => "STRUCT",
            ValueType::Bag => "BAG",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer bit-width known from static analysis. Ordered narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntWidth {
    Int2,
    Int4,
    Int8,
    /// No declared width; the runtime representation (64 bits) is the limit.
    Unconstrained,
}

impl IntWidth {
    pub fn min_value(self) -> i128 {
        match self {
            IntWidth::Int2 => i16::MIN as i128,
            IntWidth::Int4 => i32::MIN as i128,
            IntWidth::Int8 | IntWidth::Unconstrained => i64::MIN as i128,
        }
    }

    pub fn max_value(self) -> i128 {
        match self {
            IntWidth::Int2 => i16::MAX as i128,
            IntWidth::Int4 => i32::MAX as i128,
            IntWidth::Int8 | IntWidth::Unconstrained => i64::MAX as i128,
        }
    }

    pub fn contains(self, n: i128) -> bool {
        n >= self.min_value() && n <= self.max_value()
    }
}

impl fmt::Display for IntWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntWidth::Int2 => "INT2",
            IntWidth::Int4 => "INT4",
            IntWidth::Int8 => "INT8",
            IntWidth::Unconstrained => "INT",
        };
        f.write_str(s)
    }
}

/// A statically inferred type, as attached to tree nodes by an external type pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaticType {
    Any,
    Null,
    Missing,
    Bool,
    Int(IntWidth),
    Float,
    Decimal,
    Date,
    Time,
    TimeWithZone,
    Timestamp,
    Symbol,
    String,
    Clob,
    Blob,
    List,
    Sexp,
    Struct,
    Bag,
    AnyOf(Vec<StaticType>),
}

impl StaticType {
    /// Whether a runtime value conforms to this type.
    pub fn admits(&self, value: &Value) -> bool {
        let actual = value.value_type();
        match self {
            StaticType::Any => true,
            StaticType::AnyOf(types) => types.iter().any(|t| t.admits(value)),
            StaticType::Int(width) => match value.as_i64() {
                Some(n) if actual == ValueType::Int => width.contains(n as i128),
                _ => false,
            },
            other => other.value_type() == Some(actual),
        }
    }

    /// The widest integer width if every member of this type is an integer type.
    pub fn int_width(&self) -> Option<IntWidth> {
        match self {
            StaticType::Int(width) => Some(*width),
            StaticType::AnyOf(types) if !types.is_empty() => {
                let mut widest = IntWidth::Int2;
                for t in types {
                    widest = widest.max(t.int_width()?);
                }
                Some(widest)
            }
            _ => None,
        }
    }

    fn value_type(&self) -> Option<ValueType> {
        Some(match self {
            StaticType::Any | StaticType::AnyOf(_) => return None,
            StaticType::Null => ValueType::Null,
            StaticType::Missing => ValueType::Missing,
            StaticType::Bool => ValueType::Bool,
            StaticType::Int(_) => ValueType::Int,
            StaticType::Float => ValueType::Float,
            StaticType::Decimal => ValueType::Decimal,
            StaticType::Date => ValueType::Date,
            StaticType::Time => ValueType::Time,
            StaticType::TimeWithZone => ValueType::TimeWithZone,
            StaticType::Timestamp => ValueType::Timestamp,
            StaticType::Symbol => ValueType::Symbol,
            StaticType::String => ValueType::String,
            StaticType::Clob => ValueType::Clob,
            StaticType::Blob => ValueType::Blob,
            StaticType::List => ValueType::List,
            StaticType::Sexp => ValueType::Sexp,
            StaticType::Struct => ValueType::Struct,
            StaticType::Bag => ValueType::Bag,
        })
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticType::Any => f.write_str("ANY"),
            StaticType::Int(width) => write!(f, "{}", width),
            StaticType::AnyOf(types) => {
                let parts: Vec<String> = types.iter().map(|t| t.to_string()).collect();
                write!(f, "UNION({})", parts.join(", "))
            }
            other => match other.value_type() {
                Some(t) => write!(f, "{}", t),
                None => f.write_str("ANY"),
            },
        }
    }
}
