//! Conversions between [`Value`] and `serde_json::Value` for data ingress and egress.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use serde_json::{Map, Number, Value as JsonValue};

use super::{StructValue, Value};
use crate::error::EvalResult;

impl Value {
    /// Objects become structs (field order kept), arrays become lists.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if n.is_u64() {
                    BigDecimal::from_str(&n.to_string())
                        .map(Value::Decimal)
                        .unwrap_or(Value::Null)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Struct(StructValue::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            )),
        }
    }

    /// Render as JSON, materializing deferred sequences. BAG, LIST and SEXP become
    /// arrays and MISSING becomes null.
    pub fn to_json(&self) -> EvalResult<JsonValue> {
        Ok(match self.content() {
            Value::Null | Value::Missing => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(n) => JsonValue::Number(Number::from(*n)),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Decimal(d) => decimal_to_json(d),
            Value::Date(d) => JsonValue::String(d.to_string()),
            Value::Time(t) => JsonValue::String(t.to_string()),
            Value::TimeWithZone(_) => JsonValue::String(self.to_string()),
            Value::Timestamp(ts) => JsonValue::String(ts.to_rfc3339()),
            Value::Symbol(s) | Value::String(s) => JsonValue::String(s.clone()),
            Value::Clob(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
            Value::Blob(b) => JsonValue::String(b.iter().map(|x| format!("{:02x}", x)).collect()),
            Value::List(seq) | Value::Sexp(seq) | Value::Bag(seq) => {
                let values = seq.force()?;
                let mut items = Vec::with_capacity(values.len());
                for v in values.iter() {
                    items.push(v.to_json()?);
                }
                JsonValue::Array(items)
            }
            Value::Struct(s) => {
                let mut map = Map::new();
                for (k, v) in s.fields() {
                    map.insert(k.clone(), v.to_json()?);
                }
                JsonValue::Object(map)
            }
            Value::Decorated(_) => JsonValue::Null,
        })
    }
}

fn decimal_to_json(d: &BigDecimal) -> JsonValue {
    if d.is_integer() {
        if let Some(i) = d.to_i64() {
            return JsonValue::Number(Number::from(i));
        }
    }
    d.to_f64()
        .and_then(Number::from_f64)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}
