//! Total order and equality over the value model.
//!
//! Ordering (low to high): unknown, bool, numeric, date, time, time with zone,
//! timestamp, text, clob, blob, list/sexp, struct, bag. [`total_cmp`] is total
//! and drives sorting, grouping and DISTINCT. [`sql_eq`] is the coarser
//! three-valued equality used by the `=` operator.

use std::cmp::Ordering;

use bigdecimal::BigDecimal;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::{Seq, StructValue, Value};
use crate::error::EvalResult;

/// Placement of NULL and MISSING in a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullOrder {
    First,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

fn class_rank(v: &Value) -> u8 {
    match v {
        Value::Null | Value::Missing => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) | Value::Decimal(_) => 2,
        Value::Date(_) => 3,
        Value::Time(_) => 4,
        Value::TimeWithZone(_) => 5,
        Value::Timestamp(_) => 6,
        Value::Symbol(_) | Value::String(_) => 7,
        Value::Clob(_) => 8,
        Value::Blob(_) => 9,
        Value::List(_) | Value::Sexp(_) => 10,
        Value::Struct(_) => 11,
        Value::Bag(_) => 12,
        Value::Decorated(_) => class_rank(v.content()),
    }
}

/// Whether two known values belong to the same comparison class,
/// i.e. `<` between them is meaningful.
pub fn comparable(a: &Value, b: &Value) -> bool {
    class_rank(a.content()) == class_rank(b.content())
}

/// Total order with unknowns first.
///
/// Deferred sequences are forced as they are reached; a sequence whose
/// production fails makes the comparison fail with that error.
pub fn total_cmp(a: &Value, b: &Value) -> EvalResult<Ordering> {
    total_cmp_nulls(a, b, NullOrder::First)
}

/// Total order with an explicit placement for the unknown class.
/// Nested unknowns always order first.
pub fn total_cmp_nulls(a: &Value, b: &Value, nulls: NullOrder) -> EvalResult<Ordering> {
    let (a, b) = (a.content(), b.content());
    match (a.is_unknown(), b.is_unknown()) {
        (true, true) => Ok(Ordering::Equal),
        (true, false) => Ok(match nulls {
            NullOrder::First => Ordering::Less,
            NullOrder::Last => Ordering::Greater,
        }),
        (false, true) => Ok(match nulls {
            NullOrder::First => Ordering::Greater,
            NullOrder::Last => Ordering::Less,
        }),
        (false, false) => {
            let (ra, rb) = (class_rank(a), class_rank(b));
            if ra != rb {
                Ok(ra.cmp(&rb))
            } else {
                same_class_cmp(a, b)
            }
        }
    }
}

/// Comparison for one ORDER BY key. Null placement does not flip with direction.
pub fn sort_cmp(a: &Value, b: &Value, order: SortOrder, nulls: NullOrder) -> EvalResult<Ordering> {
    if a.is_unknown() || b.is_unknown() {
        return total_cmp_nulls(a, b, nulls);
    }
    let ord = total_cmp(a, b)?;
    Ok(match order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    })
}

/// SQL equality: `None` (unknown) if either operand is NULL or MISSING.
/// Values of different classes are unequal.
pub fn sql_eq(a: &Value, b: &Value) -> EvalResult<Option<bool>> {
    if a.is_unknown() || b.is_unknown() {
        return Ok(None);
    }
    Ok(Some(comparable(a, b) && total_cmp(a, b)? == Ordering::Equal))
}

/// Equality of grouping and DISTINCT keys: NULL and MISSING are equal to each other.
pub fn key_eq(a: &Value, b: &Value) -> EvalResult<bool> {
    Ok(total_cmp(a, b)? == Ordering::Equal)
}

/// Stable sort under a fallible comparison.
///
/// Every item is passed through `prepare` first, which forces whatever the
/// comparison reads; a failure there is returned before any reordering.
pub fn try_sort_by<T, P, F>(items: &mut [T], mut prepare: P, mut cmp: F) -> EvalResult<()>
where
    P: FnMut(&T) -> EvalResult<()>,
    F: FnMut(&T, &T) -> EvalResult<Ordering>,
{
    for item in items.iter() {
        prepare(item)?;
    }
    let mut failure = None;
    items.sort_by(|a, b| match cmp(a, b) {
        Ok(ord) => ord,
        Err(err) => {
            if failure.is_none() {
                failure = Some(err);
            }
            Ordering::Equal
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Binary search under a fallible comparison of each element against the target.
pub fn try_binary_search_by<T, F>(items: &[T], mut cmp: F) -> EvalResult<Result<usize, usize>>
where
    F: FnMut(&T) -> EvalResult<Ordering>,
{
    let (mut lo, mut hi) = (0, items.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match cmp(&items[mid])? {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Ok(Ok(mid)),
        }
    }
    Ok(Err(lo))
}

fn same_class_cmp(a: &Value, b: &Value) -> EvalResult<Ordering> {
    Ok(match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => float_cmp(*x, *y),
        (Value::Int(_) | Value::Float(_) | Value::Decimal(_), _) => numeric_key(a).cmp(&numeric_key(b)),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Time(x), Value::Time(y)) => x.cmp(y),
        (Value::TimeWithZone(x), Value::TimeWithZone(y)) => x.utc_seconds().cmp(&y.utc_seconds()),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Clob(x), Value::Clob(y)) | (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
        (Value::Struct(x), Value::Struct(y)) => return struct_cmp(x, y),
        (Value::Bag(x), Value::Bag(y)) => return seq_cmp(&sorted(x)?, &sorted(y)?),
        (Value::List(x) | Value::Sexp(x), Value::List(y) | Value::Sexp(y)) => {
            return seq_cmp(&x.force()?, &y.force()?)
        }
        _ => match (a.as_text(), b.as_text()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    })
}

fn float_cmp(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum NumericKey {
    NaN,
    NegInf,
    Finite(BigDecimal),
    PosInf,
}

fn numeric_key(v: &Value) -> NumericKey {
    match v {
        Value::Int(n) => NumericKey::Finite(BigDecimal::from(*n)),
        Value::Decimal(d) => NumericKey::Finite(d.clone()),
        Value::Float(f) if f.is_nan() => NumericKey::NaN,
        Value::Float(f) if f.is_infinite() && *f < 0.0 => NumericKey::NegInf,
        Value::Float(f) if f.is_infinite() => NumericKey::PosInf,
        Value::Float(f) => BigDecimal::from_f64(*f)
            .map(NumericKey::Finite)
            .unwrap_or(NumericKey::NaN),
        _ => NumericKey::NaN,
    }
}

fn seq_cmp(x: &[Value], y: &[Value]) -> EvalResult<Ordering> {
    for (a, b) in x.iter().zip(y.iter()) {
        let ord = total_cmp(a, b)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(x.len().cmp(&y.len()))
}

fn sorted(seq: &Seq) -> EvalResult<Vec<Value>> {
    let mut values = seq.force()?.as_ref().clone();
    try_sort_by(&mut values, Value::force, total_cmp)?;
    Ok(values)
}

fn field_cmp(a: &(String, Value), b: &(String, Value)) -> EvalResult<Ordering> {
    match a.0.cmp(&b.0) {
        Ordering::Equal => total_cmp(&a.1, &b.1),
        ord => Ok(ord),
    }
}

fn canonical_fields(s: &StructValue) -> EvalResult<Vec<(String, Value)>> {
    let mut fields = s.fields().to_vec();
    try_sort_by(&mut fields, |(_, v)| v.force(), field_cmp)?;
    Ok(fields)
}

fn struct_cmp(x: &StructValue, y: &StructValue) -> EvalResult<Ordering> {
    let (fx, fy) = (canonical_fields(x)?, canonical_fields(y)?);
    for (a, b) in fx.iter().zip(fy.iter()) {
        let ord = field_cmp(a, b)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(fx.len().cmp(&fy.len()))
}

/// Same type tags at every level and equal content; bags compare as multisets.
/// Two sequences whose production failed are equal only if they failed alike.
pub(crate) fn structurally_equal(a: &Value, b: &Value) -> bool {
    let (a, b) = (a.content(), b.content());
    if a.value_type() != b.value_type() {
        return false;
    }
    match (a, b) {
        (Value::List(x), Value::List(y)) | (Value::Sexp(x), Value::Sexp(y)) => {
            same_outcome(x.force(), y.force(), |x, y| all_equal(x, y))
        }
        (Value::Bag(x), Value::Bag(y)) => {
            same_outcome(sorted(x), sorted(y), |x, y| all_equal(x, y))
        }
        (Value::Struct(x), Value::Struct(y)) => {
            same_outcome(canonical_fields(x), canonical_fields(y), |fx, fy| {
                fx.len() == fy.len()
                    && fx
                        .iter()
                        .zip(fy.iter())
                        .all(|(l, r)| l.0 == r.0 && structurally_equal(&l.1, &r.1))
            })
        }
        _ => matches!(total_cmp(a, b), Ok(Ordering::Equal)),
    }
}

fn same_outcome<T, F>(x: EvalResult<T>, y: EvalResult<T>, eq: F) -> bool
where
    F: FnOnce(&T, &T) -> bool,
{
    match (x, y) {
        (Ok(x), Ok(y)) => eq(&x, &y),
        (Err(x), Err(y)) => x == y,
        _ => false,
    }
}

fn all_equal(x: &[Value], y: &[Value]) -> bool {
    x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| structurally_equal(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::value::ValueIter;
    use std::str::FromStr;

    fn sort_with(mut values: Vec<Value>, nulls: NullOrder) -> Vec<Value> {
        values.sort_by(|a, b| total_cmp_nulls(a, b, nulls).unwrap());
        values
    }

    #[test]
    fn test_class_order() {
        let ordered = vec![
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Int(-5),
            Value::Date(chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            Value::string("a"),
            Value::Blob(vec![0]),
            Value::list(vec![]),
            Value::structure::<&str>(vec![]),
            Value::bag(vec![]),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(total_cmp(&pair[0], &pair[1]).unwrap(), Ordering::Less, "{:?}", pair);
        }
    }

    #[test]
    fn test_numeric_order() {
        let values = vec![
            Value::Float(f64::INFINITY),
            Value::Int(1),
            Value::Float(f64::NAN),
            Value::Decimal(BigDecimal::from_str("-1").unwrap()),
            Value::Float(f64::NEG_INFINITY),
            Value::Int(0),
        ];
        let sorted = sort_with(values, NullOrder::First);
        let rendered: Vec<String> = sorted.iter().map(|v| v.to_string()).collect();
        assert_eq!(rendered, vec!["nan", "-inf", "-1d", "0", "1", "+inf"]);

        assert_eq!(
            total_cmp(&Value::Int(1), &Value::Decimal(BigDecimal::from_str("1.00").unwrap())).unwrap(),
            Ordering::Equal
        );
        assert_eq!(total_cmp(&Value::Int(2), &Value::Float(1.5)).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_null_order_moves_only_unknowns() {
        let values = vec![
            Value::Int(3),
            Value::Missing,
            Value::string("z"),
            Value::Null,
            Value::Bool(true),
        ];
        let first = sort_with(values.clone(), NullOrder::First);
        let last = sort_with(values, NullOrder::Last);

        let mut moved: Vec<Value> = first.iter().filter(|v| !v.is_unknown()).cloned().collect();
        moved.extend(first.iter().filter(|v| v.is_unknown()).cloned());
        assert_eq!(moved.len(), last.len());
        for (a, b) in moved.iter().zip(last.iter()) {
            assert_eq!(total_cmp(a, b).unwrap(), Ordering::Equal);
        }
    }

    #[test]
    fn test_bag_and_struct_order_ignore_element_order() {
        let a = Value::bag(vec![Value::Int(2), Value::Int(1)]);
        let b = Value::bag(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(total_cmp(&a, &b).unwrap(), Ordering::Equal);

        let s1 = Value::structure(vec![("b", Value::Int(1)), ("a", Value::Int(2))]);
        let s2 = Value::structure(vec![("a", Value::Int(2)), ("b", Value::Int(1))]);
        assert_eq!(total_cmp(&s1, &s2).unwrap(), Ordering::Equal);

        let short = Value::list(vec![Value::Int(1)]);
        let long = Value::list(vec![Value::Int(1), Value::Int(0)]);
        assert_eq!(total_cmp(&short, &long).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_sql_eq_is_three_valued() {
        assert_eq!(sql_eq(&Value::Null, &Value::Null).unwrap(), None);
        assert_eq!(sql_eq(&Value::Int(1), &Value::Missing).unwrap(), None);
        assert_eq!(sql_eq(&Value::Int(1), &Value::Float(1.0)).unwrap(), Some(true));
        assert_eq!(sql_eq(&Value::string("a"), &Value::Symbol("a".into())).unwrap(), Some(true));
        assert_eq!(sql_eq(&Value::Int(1), &Value::string("1")).unwrap(), Some(false));
        assert!(key_eq(&Value::Null, &Value::Missing).unwrap());
        assert!(!key_eq(&Value::Null, &Value::Int(0)).unwrap());
    }

    #[test]
    fn test_sort_cmp_null_placement_is_independent_of_direction() {
        let v = Value::Int(1);
        assert_eq!(sort_cmp(&Value::Null, &v, SortOrder::Desc, NullOrder::First).unwrap(), Ordering::Less);
        assert_eq!(sort_cmp(&Value::Null, &v, SortOrder::Asc, NullOrder::Last).unwrap(), Ordering::Greater);
        assert_eq!(
            sort_cmp(&Value::Int(1), &Value::Int(2), SortOrder::Desc, NullOrder::First).unwrap(),
            Ordering::Greater
        );
    }

    fn failing_bag() -> Value {
        Value::Bag(Seq::deferred(|| -> ValueIter {
            Box::new(std::iter::once(Err(EvalError::type_mismatch(
                "+",
                "numeric",
                &Value::string("x"),
            ))))
        }))
    }

    #[test]
    fn test_failed_sequence_fails_the_comparison() {
        let empty = Value::bag(vec![]);
        let bad = failing_bag();
        let err = total_cmp(&bad, &empty).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::TypeMismatch);
        assert!(sql_eq(&empty, &bad).is_err());
        assert!(key_eq(&Value::list(vec![bad.clone()]), &Value::list(vec![empty.clone()])).is_err());
        assert!(sort_cmp(&bad, &empty, SortOrder::Desc, NullOrder::Last).is_err());

        // Unknowns are decided before any sequence is produced
        assert_eq!(sql_eq(&Value::Null, &bad).unwrap(), None);
        assert_ne!(bad, empty);
    }

    #[test]
    fn test_try_sort_by_reports_the_failing_item() {
        let mut values = vec![Value::Int(2), failing_bag(), Value::Int(1)];
        assert!(try_sort_by(&mut values, Value::force, total_cmp).is_err());

        let mut values = vec![Value::Int(2), Value::Null, Value::Int(1)];
        try_sort_by(&mut values, Value::force, total_cmp).unwrap();
        assert_eq!(values, vec![Value::Null, Value::Int(1), Value::Int(2)]);
        assert_eq!(try_binary_search_by(&values, |v| total_cmp(v, &Value::Int(2))).unwrap(), Ok(2));
        assert_eq!(try_binary_search_by(&values, |v| total_cmp(v, &Value::Int(0))).unwrap(), Err(1));
    }
}
