//! Compiled closures and the factories that build them.
//!
//! A [`ThunkFactory`] bakes one failure policy into every closure it builds.
//! The strict factory raises data-dependent conditions; the permissive factory
//! turns them into MISSING. Definite faults pass through both unchanged.

use std::sync::Arc;

use crate::ast::Meta;
use crate::env::Environment;
use crate::error::{ErrorKind, EvalError, EvalResult, SourceLocation};
use crate::value::{StaticType, Value};

type EnvFn = dyn Fn(&Environment) -> EvalResult<Value> + Send + Sync;
type EnvValueFn = dyn Fn(&Environment, &Value) -> EvalResult<Value> + Send + Sync;
type EnvValueListFn = dyn Fn(&Environment, &[Value]) -> EvalResult<Value> + Send + Sync;

/// Evaluation of one tree node against an environment.
#[derive(Clone)]
pub struct Thunk {
    f: Arc<EnvFn>,
    location: Option<SourceLocation>,
}

impl Thunk {
    fn new<F>(location: Option<SourceLocation>, f: F) -> Self
    where
        F: Fn(&Environment) -> EvalResult<Value> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            location,
        }
    }

    pub fn eval(&self, env: &Environment) -> EvalResult<Value> {
        (self.f)(env)
    }

    pub fn location(&self) -> Option<SourceLocation> {
        self.location
    }
}

/// A thunk that also receives a current value, e.g. one path step.
#[derive(Clone)]
pub struct ThunkEnvValue {
    f: Arc<EnvValueFn>,
}

impl ThunkEnvValue {
    pub fn eval(&self, env: &Environment, value: &Value) -> EvalResult<Value> {
        (self.f)(env, value)
    }
}

/// A thunk over a list of already evaluated operands, e.g. a function body.
#[derive(Clone)]
pub struct ThunkEnvValueList {
    f: Arc<EnvValueListFn>,
}

impl ThunkEnvValueList {
    pub fn eval(&self, env: &Environment, values: &[Value]) -> EvalResult<Value> {
        (self.f)(env, values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    /// The operand value that decides the result on its own.
    fn decisive(self) -> bool {
        matches!(self, LogicalOp::Or)
    }

    fn name(self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        }
    }
}

fn assert_static_type(expected: &Option<StaticType>, value: Value) -> EvalResult<Value> {
    match expected {
        Some(ty) if !ty.admits(&value) => Err(EvalError::new(ErrorKind::ReturnTypeMismatch {
            expected: ty.to_string(),
            found: value.value_type(),
        })),
        _ => Ok(value),
    }
}

pub trait ThunkFactory: Clone + Send + Sync + 'static {
    /// Apply the failure policy to a node's result.
    fn handle(&self, result: EvalResult<Value>) -> EvalResult<Value>;

    /// The result of an operator when some operand is unknown, or `None` when
    /// every operand is known.
    fn propagate_unknowns(&self, operands: &[Value]) -> Option<Value>;

    /// Interpret one AND/OR operand: `Some(bool)` if known, `None` if unknown.
    fn logical_operand(&self, op: LogicalOp, value: &Value) -> EvalResult<Option<bool>>;

    /// AND/OR result when no operand was decisive but some were unknown.
    fn logical_unknown(&self) -> Value;

    /// COALESCE result when no argument was known.
    fn coalesce_exhausted(&self, all_missing: bool) -> Value;

    /// Wrap a node body: attach the node location, check the statically
    /// expected type, then apply the failure policy.
    fn thunk_env<F>(&self, meta: &Meta, f: F) -> Thunk
    where
        F: Fn(&Environment) -> EvalResult<Value> + Send + Sync + 'static,
    {
        let factory = self.clone();
        let location = meta.location;
        let expected = meta.static_type.clone();
        Thunk::new(location, move |env| {
            let result = f(env)
                .and_then(|v| assert_static_type(&expected, v))
                .map_err(|e| e.at(location));
            factory.handle(result)
        })
    }

    fn thunk_env_value<F>(&self, meta: &Meta, f: F) -> ThunkEnvValue
    where
        F: Fn(&Environment, &Value) -> EvalResult<Value> + Send + Sync + 'static,
    {
        let factory = self.clone();
        let location = meta.location;
        ThunkEnvValue {
            f: Arc::new(move |env, value| factory.handle(f(env, value).map_err(|e| e.at(location)))),
        }
    }

    fn thunk_env_value_list<F>(&self, meta: &Meta, f: F) -> ThunkEnvValueList
    where
        F: Fn(&Environment, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        let factory = self.clone();
        let location = meta.location;
        ThunkEnvValueList {
            f: Arc::new(move |env, values| {
                factory.handle(f(env, values).map_err(|e| e.at(location)))
            }),
        }
    }

    fn thunk_operands_1<F>(&self, meta: &Meta, a: Thunk, f: F) -> Thunk
    where
        F: Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
    {
        let factory = self.clone();
        self.thunk_env(meta, move |env| {
            let v = a.eval(env)?;
            match factory.propagate_unknowns(std::slice::from_ref(&v)) {
                Some(unknown) => Ok(unknown),
                None => f(&v),
            }
        })
    }

    fn thunk_operands_2<F>(&self, meta: &Meta, a: Thunk, b: Thunk, f: F) -> Thunk
    where
        F: Fn(&Value, &Value) -> EvalResult<Value> + Send + Sync + 'static,
    {
        let factory = self.clone();
        self.thunk_env(meta, move |env| {
            let operands = [a.eval(env)?, b.eval(env)?];
            match factory.propagate_unknowns(&operands) {
                Some(unknown) => Ok(unknown),
                None => f(&operands[0], &operands[1]),
            }
        })
    }

    fn thunk_operands_3<F>(&self, meta: &Meta, a: Thunk, b: Thunk, c: Thunk, f: F) -> Thunk
    where
        F: Fn(&Value, &Value, &Value) -> EvalResult<Value> + Send + Sync + 'static,
    {
        let factory = self.clone();
        self.thunk_env(meta, move |env| {
            let operands = [a.eval(env)?, b.eval(env)?, c.eval(env)?];
            match factory.propagate_unknowns(&operands) {
                Some(unknown) => Ok(unknown),
                None => f(&operands[0], &operands[1], &operands[2]),
            }
        })
    }

    /// Evaluate every operand, propagate unknowns, then hand the list to `body`.
    fn thunk_operands_n(&self, meta: &Meta, operands: Vec<Thunk>, body: ThunkEnvValueList) -> Thunk {
        let factory = self.clone();
        self.thunk_env(meta, move |env| {
            let values = operands
                .iter()
                .map(|t| t.eval(env))
                .collect::<EvalResult<Vec<_>>>()?;
            match factory.propagate_unknowns(&values) {
                Some(unknown) => Ok(unknown),
                None => body.eval(env, &values),
            }
        })
    }

    /// Left fold over two or more operands, e.g. `a + b + c`.
    fn thunk_fold<F>(&self, meta: &Meta, operands: Vec<Thunk>, f: F) -> Thunk
    where
        F: Fn(&Value, &Value) -> EvalResult<Value> + Send + Sync + 'static,
    {
        let factory = self.clone();
        self.thunk_env(meta, move |env| {
            let values = operands
                .iter()
                .map(|t| t.eval(env))
                .collect::<EvalResult<Vec<_>>>()?;
            if let Some(unknown) = factory.propagate_unknowns(&values) {
                return Ok(unknown);
            }
            let mut iter = values.iter();
            let mut acc = match iter.next() {
                Some(first) => first.clone(),
                None => return Ok(Value::Null),
            };
            for v in iter {
                acc = f(&acc, v)?;
            }
            Ok(acc)
        })
    }

    /// Short-circuiting AND/OR: the first decisive operand ends evaluation.
    fn thunk_and_or(&self, meta: &Meta, op: LogicalOp, operands: Vec<Thunk>) -> Thunk {
        let factory = self.clone();
        self.thunk_env(meta, move |env| {
            let decisive = op.decisive();
            let mut saw_unknown = false;
            for operand in &operands {
                let v = operand.eval(env)?;
                match factory.logical_operand(op, &v)? {
                    Some(b) if b == decisive => return Ok(Value::Bool(decisive)),
                    Some(_) => {}
                    None => saw_unknown = true,
                }
            }
            if saw_unknown {
                Ok(factory.logical_unknown())
            } else {
                Ok(Value::Bool(!decisive))
            }
        })
    }
}

/// LEGACY typing: data conditions are raised; unknown operands yield NULL.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictThunkFactory;

impl ThunkFactory for StrictThunkFactory {
    fn handle(&self, result: EvalResult<Value>) -> EvalResult<Value> {
        result
    }

    fn propagate_unknowns(&self, operands: &[Value]) -> Option<Value> {
        operands.iter().any(Value::is_unknown).then_some(Value::Null)
    }

    fn logical_operand(&self, op: LogicalOp, value: &Value) -> EvalResult<Option<bool>> {
        match value.content() {
            Value::Bool(b) => Ok(Some(*b)),
            v if v.is_unknown() => Ok(None),
            v => Err(EvalError::type_mismatch(op.name(), "BOOL", v)),
        }
    }

    fn logical_unknown(&self) -> Value {
        Value::Null
    }

    fn coalesce_exhausted(&self, _all_missing: bool) -> Value {
        Value::Null
    }
}

/// PERMISSIVE typing: data conditions become MISSING; MISSING dominates NULL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveThunkFactory;

impl ThunkFactory for PermissiveThunkFactory {
    fn handle(&self, result: EvalResult<Value>) -> EvalResult<Value> {
        match result {
            Err(err) if err.is_data_condition() => {
                tracing::trace!(error = %err, "data condition evaluated to MISSING");
                Ok(Value::Missing)
            }
            other => other,
        }
    }

    fn propagate_unknowns(&self, operands: &[Value]) -> Option<Value> {
        if operands.iter().any(Value::is_missing) {
            Some(Value::Missing)
        } else if operands.iter().any(Value::is_null) {
            Some(Value::Null)
        } else {
            None
        }
    }

    fn logical_operand(&self, _op: LogicalOp, value: &Value) -> EvalResult<Option<bool>> {
        Ok(value.as_bool())
    }

    fn logical_unknown(&self) -> Value {
        Value::Missing
    }

    fn coalesce_exhausted(&self, all_missing: bool) -> Value {
        if all_missing {
            Value::Missing
        } else {
            Value::Null
        }
    }
}
