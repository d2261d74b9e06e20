//! Runtime value model.
//!
//! [`Value`] is a closed tagged union over every queryable kind. Containers
//! share their contents through `Arc`, so cloning a value is cheap. Optional
//! facets ([`Named`], [`Addressed`]) are attached by decoration and queried by
//! capability, see [`Value::as_named`] and [`Value::as_addressed`].

mod compare;
mod json;
mod seq;
mod types;

use std::fmt;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use num_traits::{FromPrimitive, ToPrimitive};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};

pub use compare::{
    comparable, key_eq, sort_cmp, sql_eq, total_cmp, total_cmp_nulls, try_binary_search_by,
    try_sort_by, NullOrder, SortOrder,
};
pub use seq::{Cancellable, Seq, ValueIter};
pub use types::{IntWidth, StaticType, ValueType};

use crate::error::EvalResult;

/// A time of day with its UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZonedTime {
    pub time: NaiveTime,
    pub offset_minutes: i32,
}

impl ZonedTime {
    /// Seconds since midnight UTC, used for ordering. May fall outside one day.
    pub fn utc_seconds(&self) -> (i64, u32) {
        use chrono::Timelike;
        let local = self.time.num_seconds_from_midnight() as i64;
        (local - self.offset_minutes as i64 * 60, self.time.nanosecond())
    }
}

/// Struct contents: ordered name/value pairs. Duplicate names are allowed.
#[derive(Clone, Default)]
pub struct StructValue {
    fields: Arc<Vec<(String, Value)>>,
}

impl StructValue {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self {
            fields: Arc::new(fields),
        }
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First field with exactly this name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Display-name facet, e.g. the alias a value was bound under.
pub trait Named {
    fn name(&self) -> &Value;
}

/// Address facet: an auxiliary value identifying where a value lives.
pub trait Addressed {
    fn address(&self) -> &Value;
}

#[derive(Debug, Clone)]
pub struct NameFacet(Value);

impl Named for NameFacet {
    fn name(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct AddressFacet(Value);

impl Addressed for AddressFacet {
    fn address(&self) -> &Value {
        &self.0
    }
}

/// A value plus facet overrides.
#[derive(Debug, Clone)]
pub struct Decorated {
    inner: Value,
    name: Option<NameFacet>,
    address: Option<AddressFacet>,
}

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Null,
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeWithZone(ZonedTime),
    Timestamp(DateTime<FixedOffset>),
    Symbol(String),
    String(String),
    Clob(Vec<u8>),
    Blob(Vec<u8>),
    List(Seq),
    Sexp(Seq),
    Struct(StructValue),
    Bag(Seq),
    Decorated(Arc<Decorated>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Seq::from_vec(values))
    }

    pub fn bag(values: Vec<Value>) -> Self {
        Value::Bag(Seq::from_vec(values))
    }

    pub fn sexp(values: Vec<Value>) -> Self {
        Value::Sexp(Seq::from_vec(values))
    }

    pub fn structure<K: Into<String>>(fields: Vec<(K, Value)>) -> Self {
        Value::Struct(StructValue::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn decimal_from_f64(f: f64) -> Option<Self> {
        BigDecimal::from_f64(f).map(Value::Decimal)
    }

    /// Attach a Named facet, keeping any existing address.
    pub fn with_name(self, name: Value) -> Self {
        let (inner, address) = self.undecorate();
        Value::Decorated(Arc::new(Decorated {
            inner,
            name: Some(NameFacet(name)),
            address,
        }))
    }

    /// Attach an Addressed facet, keeping any existing name.
    pub fn with_address(self, address: Value) -> Self {
        let (inner, name) = match self {
            Value::Decorated(d) => (d.inner.clone(), d.name.clone()),
            other => (other, None),
        };
        Value::Decorated(Arc::new(Decorated {
            inner,
            name,
            address: Some(AddressFacet(address)),
        }))
    }

    fn undecorate(self) -> (Value, Option<AddressFacet>) {
        match self {
            Value::Decorated(d) => (d.inner.clone(), d.address.clone()),
            other => (other, None),
        }
    }

    pub fn as_named(&self) -> Option<&dyn Named> {
        match self {
            Value::Decorated(d) => d.name.as_ref().map(|n| n as &dyn Named),
            _ => None,
        }
    }

    pub fn as_addressed(&self) -> Option<&dyn Addressed> {
        match self {
            Value::Decorated(d) => d.address.as_ref().map(|a| a as &dyn Addressed),
            _ => None,
        }
    }

    /// The value with any facet decoration removed.
    pub fn content(&self) -> &Value {
        match self {
            Value::Decorated(d) => d.inner.content(),
            other => other,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Decorated(d) => d.inner.value_type(),
            Value::Null => ValueType::Null,
            Value::Missing => ValueType::Missing,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Decimal(_) => ValueType::Decimal,
            Value::Date(_) => ValueType::Date,
            Value::Time(_) => ValueType::Time,
            Value::TimeWithZone(_) => ValueType::TimeWithZone,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Symbol(_) => ValueType::Symbol,
            Value::String(_) => ValueType::String,
            Value::Clob(_) => ValueType::Clob,
            Value::Blob(_) => ValueType::Blob,
            Value::List(_) => ValueType::List,
            Value::Sexp(_) => ValueType::Sexp,
            Value::Struct(_) => ValueType::Struct,
            Value::Bag(_) => ValueType::Bag,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.content(), Value::Null)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.content(), Value::Missing)
    }

    /// NULL or MISSING.
    pub fn is_unknown(&self) -> bool {
        self.value_type().is_unknown()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.content() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.content() {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value as a float, for any numeric subtype.
    pub fn as_f64(&self) -> Option<f64> {
        match self.content() {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Numeric value as an exact decimal. Non-finite floats have none.
    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self.content() {
            Value::Int(n) => Some(BigDecimal::from(*n)),
            Value::Float(f) => BigDecimal::from_f64(*f),
            Value::Decimal(d) => Some(d.clone()),
            _ => None,
        }
    }

    /// STRING or SYMBOL text.
    pub fn as_text(&self) -> Option<&str> {
        match self.content() {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// CLOB or BLOB bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.content() {
            Value::Clob(b) | Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self.content() {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// The backing sequence of a LIST, SEXP or BAG.
    pub fn as_seq(&self) -> Option<&Seq> {
        match self.content() {
            Value::List(s) | Value::Sexp(s) | Value::Bag(s) => Some(s),
            _ => None,
        }
    }

    /// Child values of a container: sequence elements or struct field values.
    pub fn elements(&self) -> Option<ValueIter> {
        match self.content() {
            Value::List(s) | Value::Sexp(s) | Value::Bag(s) => Some(s.iter()),
            Value::Struct(s) => {
                let values: Vec<Value> = s.fields().iter().map(|(_, v)| v.clone()).collect();
                Some(Box::new(values.into_iter().map(Ok)))
            }
            _ => None,
        }
    }

    /// Recursively materialize every deferred sequence, surfacing production errors.
    pub fn force(&self) -> EvalResult<()> {
        match self.content() {
            Value::List(s) | Value::Sexp(s) | Value::Bag(s) => {
                for v in s.force()?.iter() {
                    v.force()?;
                }
                Ok(())
            }
            Value::Struct(s) => {
                for (_, v) in s.fields() {
                    v.force()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality: same type tags throughout, bags as multisets.
    fn eq(&self, other: &Self) -> bool {
        compare::structurally_equal(self, other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, sep: &str, close: &str, seq: &Seq) -> fmt::Result {
    let values = match seq.force() {
        Ok(values) => values,
        Err(err) => return write!(f, "{}<{}>{}", open, err, close),
    };
    f.write_str(open)?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", v)?;
    }
    f.write_str(close)
}

fn write_bytes(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Missing => f.write_str("missing"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) if x.is_nan() => f.write_str("nan"),
            Value::Float(x) if x.is_infinite() => {
                f.write_str(if *x > 0.0 { "+inf" } else { "-inf" })
            }
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Decimal(d) => write!(f, "{}d", d),
            Value::Date(d) => write!(f, "DATE '{}'", d),
            Value::Time(t) => write!(f, "TIME '{}'", t),
            Value::TimeWithZone(z) => {
                let sign = if z.offset_minutes < 0 { '-' } else { '+' };
                let off = z.offset_minutes.abs();
                write!(f, "TIME WITH TIME ZONE '{}{}{:02}:{:02}'", z.time, sign, off / 60, off % 60)
            }
            Value::Timestamp(ts) => write!(f, "`{}`", ts.to_rfc3339()),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Clob(b) => {
                f.write_str("{{\"")?;
                f.write_str(&String::from_utf8_lossy(b))?;
                f.write_str("\"}}")
            }
            Value::Blob(b) => {
                f.write_str("{{0x")?;
                write_bytes(f, b)?;
                f.write_str("}}")
            }
            Value::List(s) => write_seq(f, "[", ", ", "]", s),
            Value::Sexp(s) => write_seq(f, "(", " ", ")", s),
            Value::Bag(s) => write_seq(f, "<<", ", ", ">>", s),
            Value::Struct(s) => {
                f.write_str("{")?;
                for (i, (k, v)) in s.fields().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{}': {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Decorated(d) => write!(f, "{}", d.inner),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facets_are_capabilities() {
        let plain = Value::Int(1);
        assert!(plain.as_named().is_none());
        assert!(plain.as_addressed().is_none());

        let v = Value::Int(1)
            .with_name(Value::string("x"))
            .with_address(Value::Int(42));
        assert_eq!(v.as_named().unwrap().name(), &Value::string("x"));
        assert_eq!(v.as_addressed().unwrap().address(), &Value::Int(42));
        assert_eq!(v.value_type(), ValueType::Int);
        assert_eq!(v.as_i64(), Some(1));
        assert_eq!(v, Value::Int(1));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Int(3).as_decimal(), Some(BigDecimal::from(3)));
        assert_eq!(Value::Symbol("s".into()).as_text(), Some("s"));
        assert_eq!(Value::Blob(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
        assert!(Value::Float(f64::NAN).as_decimal().is_none());
        assert!(Value::Missing.is_unknown());
        assert!(Value::Null.is_unknown());
        assert!(!Value::Bool(false).is_unknown());
    }

    #[test]
    fn test_display() {
        let v = Value::bag(vec![
            Value::structure(vec![("a", Value::Int(1)), ("b", Value::string("x"))]),
            Value::list(vec![Value::Null, Value::Missing]),
        ]);
        assert_eq!(v.to_string(), "<<{'a': 1, 'b': 'x'}, [null, missing]>>");
        assert_eq!(Value::Float(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(
            Value::bag(vec![Value::Int(1), Value::Int(2)]),
            Value::bag(vec![Value::Int(2), Value::Int(1)])
        );
        assert_ne!(
            Value::list(vec![Value::Int(1), Value::Int(2)]),
            Value::list(vec![Value::Int(2), Value::Int(1)])
        );
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Null, Value::Missing);
        assert_ne!(
            Value::bag(vec![Value::Int(1)]),
            Value::list(vec![Value::Int(1)])
        );
    }

    #[test]
    fn test_force_surfaces_production_errors() {
        let bad = Value::Bag(Seq::deferred(|| {
            Box::new(std::iter::once(Err(crate::error::EvalError::interrupted())))
        }));
        assert!(bad.force().unwrap_err().is_interrupted());
        assert!(Value::list(vec![Value::Int(1)]).force().is_ok());
    }
}
