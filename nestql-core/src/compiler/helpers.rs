//! Value-level operator helpers used by compiled thunks.
//!
//! - compare: comparison operators over known operands
//! - like_regex / like_match: LIKE pattern translation and matching
//! - InList / in_collection: IN membership (precomputed and runtime forms)
//! - cast: CAST conversions
//! - is_type: IS [NOT] type tests

use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use regex::Regex;

use super::arith::truncate_decimal;
use crate::ast::{CastTarget, NAryOp};
use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::value::{
    comparable, sql_eq, total_cmp, try_binary_search_by, try_sort_by, Value, ValueType,
};

const MAX_LIKE_PATTERN_LEN: usize = 1000;

/// Comparison of two known operands.
pub fn compare(op: NAryOp, a: &Value, b: &Value) -> EvalResult<Value> {
    match op {
        NAryOp::Eq => Ok(Value::Bool(sql_eq(a, b)? == Some(true))),
        NAryOp::Ne => Ok(Value::Bool(sql_eq(a, b)? != Some(true))),
        _ => {
            if !comparable(a, b) {
                return Err(EvalError::type_mismatch(
                    op.symbol(),
                    format!("a value comparable with {}", a.value_type()),
                    b,
                ));
            }
            let ord = total_cmp(a, b)?;
            let result = match op {
                NAryOp::Lt => ord == Ordering::Less,
                NAryOp::Le => ord != Ordering::Greater,
                NAryOp::Gt => ord == Ordering::Greater,
                NAryOp::Ge => ord != Ordering::Less,
                _ => false,
            };
            Ok(Value::Bool(result))
        }
    }
}

/// `lo <= x AND x <= hi` over known operands.
pub fn between(x: &Value, lo: &Value, hi: &Value) -> EvalResult<Value> {
    let low = compare(NAryOp::Ge, x, lo)?;
    let high = compare(NAryOp::Le, x, hi)?;
    Ok(Value::Bool(low.as_bool() == Some(true) && high.as_bool() == Some(true)))
}

pub fn not(v: &Value) -> EvalResult<Value> {
    match v.as_bool() {
        Some(b) => Ok(Value::Bool(!b)),
        None => Err(EvalError::type_mismatch("NOT", "BOOL", v)),
    }
}

pub fn concat(a: &Value, b: &Value) -> EvalResult<Value> {
    match (a.as_text(), b.as_text()) {
        (Some(x), Some(y)) => Ok(Value::String(format!("{}{}", x, y))),
        (None, _) => Err(EvalError::type_mismatch("||", "text", a)),
        (_, None) => Err(EvalError::type_mismatch("||", "text", b)),
    }
}

fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> EvalError {
    EvalError::new(ErrorKind::InvalidLikePattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    })
}

/// Translate a LIKE pattern into an anchored regex. `%` matches any run of
/// characters and `_` exactly one; the escape character quotes the next one.
pub fn like_regex(pattern: &str, escape: Option<&str>) -> EvalResult<Regex> {
    if pattern.len() > MAX_LIKE_PATTERN_LEN {
        return Err(invalid_pattern(pattern, "pattern too long"));
    }
    let escape = match escape {
        None => None,
        Some(e) => {
            let mut chars = e.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => return Err(invalid_pattern(pattern, "escape must be a single character")),
            }
        }
    };

    let mut regex_pattern = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            match chars.next() {
                Some(next) if next == '%' || next == '_' || Some(next) == escape => {
                    regex_pattern.push_str(&regex::escape(&next.to_string()));
                }
                _ => return Err(invalid_pattern(pattern, "escape must precede %, _ or itself")),
            }
            continue;
        }
        match c {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            other => regex_pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex_pattern.push('$');

    Regex::new(&regex_pattern).map_err(|e| invalid_pattern(pattern, e.to_string()))
}

pub fn like_match(value: &Value, regex: &Regex) -> EvalResult<Value> {
    match value.as_text() {
        Some(s) => Ok(Value::Bool(regex.is_match(s))),
        None => Err(EvalError::type_mismatch("LIKE", "text", value)),
    }
}

/// Text of a LIKE pattern or escape operand.
pub fn like_text<'a>(v: &'a Value) -> EvalResult<&'a str> {
    v.as_text()
        .ok_or_else(|| EvalError::type_mismatch("LIKE", "text", v))
}

/// Membership test against a right operand precomputed from known literals.
#[derive(Debug, Clone)]
pub struct InList {
    sorted: Vec<Value>,
    has_unknown: bool,
}

impl InList {
    pub fn new(values: Vec<Value>) -> EvalResult<Self> {
        let has_unknown = values.iter().any(Value::is_unknown);
        let mut sorted: Vec<Value> = values.into_iter().filter(|v| !v.is_unknown()).collect();
        try_sort_by(&mut sorted, Value::force, total_cmp)?;
        Ok(Self {
            sorted,
            has_unknown,
        })
    }

    /// `needle` must be known.
    pub fn contains(&self, needle: &Value) -> EvalResult<Value> {
        needle.force()?;
        Ok(
            if try_binary_search_by(&self.sorted, |v| total_cmp(v, needle))?.is_ok() {
                Value::Bool(true)
            } else if self.has_unknown {
                Value::Null
            } else {
                Value::Bool(false)
            },
        )
    }
}

/// Membership test against a runtime collection. Both operands must be known.
pub fn in_collection(needle: &Value, haystack: &Value) -> EvalResult<Value> {
    let elements = match haystack.as_seq() {
        Some(seq) => seq.iter(),
        None => return Err(EvalError::type_mismatch("IN", "a collection", haystack)),
    };
    let mut saw_unknown = false;
    for element in elements {
        match sql_eq(needle, &element?)? {
            Some(true) => return Ok(Value::Bool(true)),
            Some(false) => {}
            None => saw_unknown = true,
        }
    }
    Ok(if saw_unknown {
        Value::Null
    } else {
        Value::Bool(false)
    })
}

/// Negate a membership or LIKE result; unknown stays unknown.
pub fn negate_bool(v: Value) -> Value {
    match v.as_bool() {
        Some(b) => Value::Bool(!b),
        None => v,
    }
}

/// IS [NOT] type test. `MISSING IS NULL` holds.
pub fn is_type(v: &Value, ty: ValueType) -> bool {
    match ty {
        ValueType::Null => v.is_unknown(),
        ValueType::Missing => v.is_missing(),
        other => v.value_type() == other,
    }
}

fn cast_failed(v: &Value, to: CastTarget) -> EvalError {
    EvalError::new(ErrorKind::CastFailed {
        from: v.value_type(),
        to: to.value_type(),
    })
}

/// CAST of a known value.
pub fn cast(v: &Value, to: CastTarget) -> EvalResult<Value> {
    let fail = || cast_failed(v, to);
    let v = v.content();
    match to {
        CastTarget::Bool => match v {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Int(n) => Ok(Value::Bool(*n != 0)),
            Value::Float(f) => Ok(Value::Bool(*f != 0.0)),
            Value::Decimal(d) => Ok(Value::Bool(!d.is_zero())),
            _ => match v.as_text().map(|s| s.trim().to_ascii_lowercase()) {
                Some(s) if s == "true" => Ok(Value::Bool(true)),
                Some(s) if s == "false" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
        },
        CastTarget::Int => match v {
            Value::Int(n) => Ok(Value::Int(*n)),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::Float(f) if f.is_finite() => {
                let t = f.trunc();
                if t >= i64::MIN as f64 && t < i64::MAX as f64 {
                    Ok(Value::Int(t as i64))
                } else {
                    Err(fail())
                }
            }
            Value::Decimal(d) => truncate_decimal(d).map(Value::Int).ok_or_else(fail),
            _ => match v.as_text() {
                Some(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| fail()),
                None => Err(fail()),
            },
        },
        CastTarget::Float => match v {
            Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) => {
                v.as_f64().map(Value::Float).ok_or_else(fail)
            }
            _ => match v.as_text() {
                Some(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| fail()),
                None => Err(fail()),
            },
        },
        CastTarget::Decimal => match v {
            Value::Bool(b) => Ok(Value::Decimal(BigDecimal::from(*b as i64))),
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) => {
                v.as_decimal().map(Value::Decimal).ok_or_else(fail)
            }
            _ => match v.as_text() {
                Some(s) => BigDecimal::from_str(s.trim())
                    .map(Value::Decimal)
                    .map_err(|_| fail()),
                None => Err(fail()),
            },
        },
        CastTarget::String | CastTarget::Symbol => {
            let text = match v {
                Value::String(s) | Value::Symbol(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Int(n) => n.to_string(),
                Value::Float(f) => float_text(*f),
                Value::Decimal(d) => d.to_string(),
                Value::Date(d) => d.to_string(),
                Value::Time(t) => t.to_string(),
                Value::Timestamp(ts) => ts.to_rfc3339(),
                _ => return Err(fail()),
            };
            Ok(if to == CastTarget::String {
                Value::String(text)
            } else {
                Value::Symbol(text)
            })
        }
    }
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f == f64::INFINITY {
        "+inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{:?}", f)
    }
}
