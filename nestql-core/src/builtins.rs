//! Builtin scalar functions.
//!
//! Storage-independent functions callable from queries. Names are matched
//! case-insensitively; arity is checked when the call is compiled.

use num_traits::Signed;

use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::value::{sql_eq, IntWidth, Value};

/// How a function treats NULL and MISSING arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownHandling {
    /// Any unknown argument short-circuits to the typing mode's unknown result.
    Propagate,
    /// The function receives unknown arguments and decides itself.
    Inspect,
    /// First known argument wins; evaluated lazily by the compiler.
    Coalesce,
}

pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub unknowns: UnknownHandling,
    pub call: fn(&[Value]) -> EvalResult<Value>,
}

impl Builtin {
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }

    pub fn arity_text(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "coalesce",
        min_args: 1,
        max_args: None,
        unknowns: UnknownHandling::Coalesce,
        call: first_known,
    },
    Builtin {
        name: "nullif",
        min_args: 2,
        max_args: Some(2),
        unknowns: UnknownHandling::Inspect,
        call: nullif,
    },
    Builtin {
        name: "exists",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Inspect,
        call: exists,
    },
    Builtin {
        name: "upper",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Propagate,
        call: upper,
    },
    Builtin {
        name: "lower",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Propagate,
        call: lower,
    },
    Builtin {
        name: "trim",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Propagate,
        call: trim,
    },
    Builtin {
        name: "char_length",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Propagate,
        call: char_length,
    },
    Builtin {
        name: "character_length",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Propagate,
        call: char_length,
    },
    Builtin {
        name: "cardinality",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Propagate,
        call: cardinality,
    },
    Builtin {
        name: "size",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Propagate,
        call: cardinality,
    },
    Builtin {
        name: "abs",
        min_args: 1,
        max_args: Some(1),
        unknowns: UnknownHandling::Propagate,
        call: abs,
    },
];

/// Find a builtin by name, ignoring case.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name.eq_ignore_ascii_case(name))
}

fn text_arg<'a>(function: &str, v: &'a Value) -> EvalResult<&'a str> {
    v.as_text()
        .ok_or_else(|| EvalError::type_mismatch(function, "text", v))
}

fn first_known(args: &[Value]) -> EvalResult<Value> {
    Ok(args
        .iter()
        .find(|v| !v.is_unknown())
        .cloned()
        .unwrap_or(Value::Null))
}

fn nullif(args: &[Value]) -> EvalResult<Value> {
    if sql_eq(&args[0], &args[1])? == Some(true) {
        Ok(Value::Null)
    } else {
        Ok(args[0].clone())
    }
}

fn exists(args: &[Value]) -> EvalResult<Value> {
    let v = &args[0];
    if v.is_unknown() {
        return Ok(Value::Bool(false));
    }
    match v.as_seq() {
        Some(seq) => Ok(Value::Bool(seq.iter().next().transpose()?.is_some())),
        None => Err(EvalError::type_mismatch("exists", "a collection", v)),
    }
}

// String functions

fn upper(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::String(text_arg("upper", &args[0])?.to_uppercase()))
}

fn lower(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::String(text_arg("lower", &args[0])?.to_lowercase()))
}

fn trim(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::String(text_arg("trim", &args[0])?.trim().to_string()))
}

fn char_length(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Int(text_arg("char_length", &args[0])?.chars().count() as i64))
}

// Collection functions

fn cardinality(args: &[Value]) -> EvalResult<Value> {
    let v = &args[0];
    if let Some(seq) = v.as_seq() {
        return Ok(Value::Int(seq.force()?.len() as i64));
    }
    match v.as_struct() {
        Some(s) => Ok(Value::Int(s.len() as i64)),
        None => Err(EvalError::type_mismatch("cardinality", "a collection", v)),
    }
}

// Math functions

fn abs(args: &[Value]) -> EvalResult<Value> {
    match args[0].content() {
        Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(|| {
            EvalError::new(ErrorKind::IntegerOverflow {
                width: IntWidth::Unconstrained,
            })
        }),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
        other => Err(EvalError::type_mismatch("abs", "numeric", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> EvalResult<Value> {
        (lookup(name).unwrap().call)(args)
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("COALESCE").unwrap().name, "coalesce");
        assert!(lookup("levenshtein").is_none());
        assert!(lookup("nullif").unwrap().accepts(2));
        assert!(!lookup("nullif").unwrap().accepts(3));
        assert_eq!(lookup("coalesce").unwrap().arity_text(), "at least 1");
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("UPPER", &[Value::string("hello")]).unwrap(), Value::string("HELLO"));
        assert_eq!(call("lower", &[Value::string("HeLLo")]).unwrap(), Value::string("hello"));
        assert_eq!(call("trim", &[Value::string("  x ")]).unwrap(), Value::string("x"));
        assert_eq!(call("char_length", &[Value::string("héllo")]).unwrap(), Value::Int(5));
        assert!(call("upper", &[Value::Int(1)]).unwrap_err().is_data_condition());
    }

    #[test]
    fn test_collection_functions() {
        let bag = Value::bag(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(call("cardinality", &[bag.clone()]).unwrap(), Value::Int(2));
        assert_eq!(call("size", &[Value::structure(vec![("a", Value::Int(1))])]).unwrap(), Value::Int(1));
        assert_eq!(call("exists", &[bag]).unwrap(), Value::Bool(true));
        assert_eq!(call("exists", &[Value::list(vec![])]).unwrap(), Value::Bool(false));
        assert_eq!(call("exists", &[Value::Missing]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_nullif_and_abs() {
        assert_eq!(call("nullif", &[Value::Int(1), Value::Float(1.0)]).unwrap(), Value::Null);
        assert_eq!(call("nullif", &[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(1));
        assert_eq!(call("nullif", &[Value::Int(1), Value::Null]).unwrap(), Value::Int(1));
        assert_eq!(call("abs", &[Value::Int(-3)]).unwrap(), Value::Int(3));
        assert!(call("abs", &[Value::Int(i64::MIN)]).is_err());
    }
}
