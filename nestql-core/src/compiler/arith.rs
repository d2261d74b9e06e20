//! Numeric arithmetic with exact integer overflow detection.
//!
//! Integer operands are computed in `i128` and range-checked against the
//! statically known width, or the 64-bit runtime width when none is known.
//! Mixed operands promote INT < FLOAT < DECIMAL; a non-finite float stays FLOAT.

use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};

use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::value::{IntWidth, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        }
    }
}

fn zero_divisor(op: ArithOp) -> EvalError {
    match op {
        ArithOp::Mod => EvalError::new(ErrorKind::ModuloByZero),
        _ => EvalError::new(ErrorKind::DivideByZero),
    }
}

fn check_width(n: i128, width: IntWidth) -> EvalResult<Value> {
    if width.contains(n) {
        Ok(Value::Int(n as i64))
    } else {
        Err(EvalError::new(ErrorKind::IntegerOverflow { width }))
    }
}

fn is_zero(v: &Value) -> bool {
    match v.content() {
        Value::Int(n) => *n == 0,
        Value::Float(f) => *f == 0.0,
        Value::Decimal(d) => d.is_zero(),
        _ => false,
    }
}

/// Binary arithmetic over two known numeric values.
pub fn arith(op: ArithOp, a: &Value, b: &Value, width: Option<IntWidth>) -> EvalResult<Value> {
    for v in [a, b] {
        if !v.value_type().is_numeric() {
            return Err(EvalError::type_mismatch(op.symbol(), "numeric", v));
        }
    }
    if matches!(op, ArithOp::Div | ArithOp::Mod) && is_zero(b) {
        return Err(zero_divisor(op));
    }

    match (a.content(), b.content()) {
        (Value::Int(x), Value::Int(y)) => int_arith(op, *x as i128, *y as i128, width.unwrap_or(IntWidth::Unconstrained)),
        (Value::Float(_), _) | (_, Value::Float(_)) if !promotes_to_decimal(a, b) => {
            let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            Ok(Value::Float(float_arith(op, x, y)))
        }
        _ => match (a.as_decimal(), b.as_decimal()) {
            (Some(x), Some(y)) => Ok(Value::Decimal(decimal_arith(op, &x, &y))),
            _ => {
                let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                Ok(Value::Float(float_arith(op, x, y)))
            }
        },
    }
}

/// A DECIMAL operand lifts the result to DECIMAL unless a float is non-finite.
fn promotes_to_decimal(a: &Value, b: &Value) -> bool {
    let has_decimal = matches!(a.content(), Value::Decimal(_)) || matches!(b.content(), Value::Decimal(_));
    let finite = |v: &Value| match v.content() {
        Value::Float(f) => f.is_finite(),
        _ => true,
    };
    has_decimal && finite(a) && finite(b)
}

fn int_arith(op: ArithOp, x: i128, y: i128, width: IntWidth) -> EvalResult<Value> {
    let n = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
    };
    check_width(n, width)
}

fn float_arith(op: ArithOp, x: f64, y: f64) -> f64 {
    match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
    }
}

fn decimal_arith(op: ArithOp, x: &BigDecimal, y: &BigDecimal) -> BigDecimal {
    match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
    }
}

/// Unary minus.
pub fn negate(v: &Value, width: Option<IntWidth>) -> EvalResult<Value> {
    match v.content() {
        Value::Int(n) => check_width(-(*n as i128), width.unwrap_or(IntWidth::Unconstrained)),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Decimal(d) => Ok(Value::Decimal(-d.clone())),
        other => Err(EvalError::type_mismatch("-", "numeric", other)),
    }
}

/// Unary plus: numeric identity.
pub fn identity(v: &Value) -> EvalResult<Value> {
    if v.value_type().is_numeric() {
        Ok(v.content().clone())
    } else {
        Err(EvalError::type_mismatch("+", "numeric", v))
    }
}

/// Sum of a sequence of known numerics, used by SUM and AVG.
pub fn sum<'a, I: IntoIterator<Item = &'a Value>>(values: I) -> EvalResult<Option<Value>> {
    let mut acc: Option<Value> = None;
    for v in values {
        acc = Some(match acc {
            None => identity(v)?,
            Some(a) => arith(ArithOp::Add, &a, v, None)?,
        });
    }
    Ok(acc)
}

/// Average as DECIMAL, or FLOAT when the sum is a float.
pub fn average(total: &Value, count: usize) -> EvalResult<Value> {
    match total.content() {
        Value::Float(f) => Ok(Value::Float(f / count as f64)),
        other => match other.as_decimal() {
            Some(d) => Ok(Value::Decimal(d / BigDecimal::from(count as u64))),
            None => Err(EvalError::type_mismatch("AVG", "numeric", other)),
        },
    }
}

/// Decimal to `i64` with truncation toward zero.
pub fn truncate_decimal(d: &BigDecimal) -> Option<i64> {
    d.with_scale(0).to_i64()
}
