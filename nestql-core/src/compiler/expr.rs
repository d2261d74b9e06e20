//! Scalar expression nodes: literals, variables, paths, operators, CASE, CAST,
//! function calls and constructors.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;

use super::arith::{self, ArithOp};
use super::helpers::{self, InList};
use super::thunk::{LogicalOp, Thunk, ThunkEnvValue, ThunkFactory};
use super::{Compiler, Scope};
use crate::ast::{CaseBranch, CastTarget, Expr, ExprKind, Literal, Meta, NAryOp, PathStep, StructField, VarQualifier};
use crate::bindings::{BindingName, Bindings, CaseSensitivity};
use crate::builtins::{self, UnknownHandling};
use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::options::UndefinedVariableBehavior;
use crate::value::{sql_eq, StructValue, Value, ValueType, ZonedTime};

pub(super) fn arity_error(operator: &str, expected: String, found: usize) -> EvalError {
    EvalError::new(ErrorKind::InvalidArity {
        operator: operator.to_string(),
        expected,
        found,
    })
}

fn arity_text(min: usize, max: Option<usize>) -> String {
    match max {
        Some(max) if max == min => min.to_string(),
        Some(max) => format!("{} to {}", min, max),
        None => format!("at least {}", min),
    }
}

/// Operands of a fixed-arity operator as an array.
fn exact<const N: usize>(op: NAryOp, operands: Vec<Thunk>) -> EvalResult<[Thunk; N]> {
    let found = operands.len();
    <[Thunk; N]>::try_from(operands).map_err(|_| arity_error(op.symbol(), N.to_string(), found))
}

/// Text of a plain string or symbol literal.
fn literal_text(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Lit(Literal::String(s) | Literal::Symbol(s)) if expr.meta.static_type.is_none() => {
            Some(s.clone())
        }
        _ => None,
    }
}

fn field_step(value: &Value, name: &BindingName) -> EvalResult<Value> {
    match value.as_struct() {
        Some(s) => Ok(s.get(name)?.unwrap_or(Value::Missing)),
        None => Ok(Value::Missing),
    }
}

fn index_step(value: &Value, key: &Value) -> EvalResult<Value> {
    match (value.content(), key.content()) {
        (Value::List(seq) | Value::Sexp(seq), Value::Int(i)) => match usize::try_from(*i) {
            Ok(i) => Ok(seq.iter().nth(i).transpose()?.unwrap_or(Value::Missing)),
            Err(_) => Ok(Value::Missing),
        },
        (Value::Struct(s), _) => match key.as_text() {
            Some(text) => Ok(s.get(&BindingName::sensitive(text))?.unwrap_or(Value::Missing)),
            None => Ok(Value::Missing),
        },
        _ => Ok(Value::Missing),
    }
}

impl<F: ThunkFactory> Compiler<F> {
    pub(super) fn compile_expr(&self, expr: &Expr, scope: &Scope) -> EvalResult<Thunk> {
        let meta = &expr.meta;
        let nested = scope.expression();
        let result = match &expr.kind {
            ExprKind::Lit(literal) => self.compile_literal(meta, literal),
            ExprKind::Var {
                name,
                case,
                qualifier,
            } => self.compile_var(meta, name, *case, *qualifier, scope),
            ExprKind::Param(ordinal) => {
                let ordinal = *ordinal;
                Ok(self.factory.thunk_env(meta, move |env| env.parameter(ordinal)))
            }
            ExprKind::Path { root, steps } => self.compile_path(meta, root, steps, scope),
            ExprKind::NAry { op, args } => self.compile_nary(meta, *op, args, &nested),
            ExprKind::IsType {
                operand,
                ty,
                negated,
            } => {
                let operand = self.compile_expr(operand, &nested)?;
                let (ty, negated) = (*ty, *negated);
                Ok(self.factory.thunk_env(meta, move |env| {
                    let v = operand.eval(env)?;
                    Ok(Value::Bool(helpers::is_type(&v, ty) != negated))
                }))
            }
            ExprKind::Case {
                operand,
                branches,
                default,
            } => self.compile_case(meta, operand.as_deref(), branches, default.as_deref(), &nested),
            ExprKind::Cast { operand, to } => self.compile_cast(meta, operand, *to, &nested),
            ExprKind::Call { name, args } => self.compile_call(meta, name, args, &nested),
            ExprKind::Aggregate {
                func,
                quantifier,
                arg,
            } => self.compile_aggregate(meta, *func, *quantifier, arg.as_deref(), &nested),
            ExprKind::List(items) => self.compile_sequence(meta, items, &nested, Value::list),
            ExprKind::Sexp(items) => self.compile_sequence(meta, items, &nested, Value::sexp),
            ExprKind::Bag(items) => self.compile_sequence(meta, items, &nested, Value::bag),
            ExprKind::Struct(fields) => self.compile_struct(meta, fields, &nested),
            ExprKind::Select(select) => self.compile_select(meta, select, &nested),
        };
        result.map_err(|e| e.at(meta.location))
    }

    pub(super) fn compile_all(&self, exprs: &[Expr], scope: &Scope) -> EvalResult<Vec<Thunk>> {
        exprs.iter().map(|e| self.compile_expr(e, scope)).collect()
    }

    pub(super) fn literal_value(&self, literal: &Literal) -> EvalResult<Value> {
        Ok(match literal {
            Literal::Null => Value::Null,
            Literal::Missing => Value::Missing,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(n.to_i64().ok_or_else(|| {
                EvalError::new(ErrorKind::LiteralIntegerOverflow {
                    literal: n.to_string(),
                })
            })?),
            Literal::Float(f) => Value::Float(*f),
            Literal::Decimal(text) => Value::Decimal(BigDecimal::from_str(text.trim()).map_err(|_| {
                EvalError::new(ErrorKind::CastFailed {
                    from: ValueType::String,
                    to: ValueType::Decimal,
                })
            })?),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Symbol(s) => Value::Symbol(s.clone()),
            Literal::Date(d) => Value::Date(*d),
            Literal::Time(t) => Value::Time(*t),
            Literal::TimeWithZone {
                time,
                offset_minutes,
            } => Value::TimeWithZone(ZonedTime {
                time: *time,
                offset_minutes: offset_minutes.unwrap_or(self.options.default_timezone_offset_minutes),
            }),
            Literal::Timestamp(ts) => Value::Timestamp(*ts),
            Literal::Blob(bytes) => Value::Blob(bytes.clone()),
            Literal::Clob(bytes) => Value::Clob(bytes.clone()),
        })
    }

    fn compile_literal(&self, meta: &Meta, literal: &Literal) -> EvalResult<Thunk> {
        let value = self.literal_value(literal)?;
        Ok(self.factory.thunk_env(meta, move |_| Ok(value.clone())))
    }

    /// Elements of a collection constructor made only of plain literals.
    fn literal_elements(&self, expr: &Expr) -> EvalResult<Option<Vec<Value>>> {
        let items = match &expr.kind {
            ExprKind::List(items) | ExprKind::Bag(items) | ExprKind::Sexp(items) => items,
            _ => return Ok(None),
        };
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Lit(literal) if item.meta.static_type.is_none() => {
                    values.push(self.literal_value(literal).map_err(|e| e.at(item.meta.location))?);
                }
                _ => return Ok(None),
            }
        }
        Ok(Some(values))
    }

    fn compile_var(
        &self,
        meta: &Meta,
        name: &str,
        case: CaseSensitivity,
        qualifier: VarQualifier,
        scope: &Scope,
    ) -> EvalResult<Thunk> {
        let binding = BindingName::new(name, case);
        if scope.hidden_by_group(&binding) {
            return Err(EvalError::new(ErrorKind::VariableNotInGroupBy {
                name: name.to_string(),
            }));
        }
        let globals_first = qualifier == VarQualifier::Unqualified && scope.in_from_source;
        let undefined_is_missing = self.options.undefined_variable == UndefinedVariableBehavior::Missing;

        Ok(self.factory.thunk_env(meta, move |env| {
            match env.lookup(&binding, globals_first)? {
                Some(v) => Ok(v),
                None if undefined_is_missing => Ok(Value::Missing),
                None => Err(EvalError::new(ErrorKind::UndefinedVariable {
                    name: binding.name.clone(),
                    quoted: binding.case == CaseSensitivity::Sensitive,
                })),
            }
        }))
    }

    fn compile_path(&self, meta: &Meta, root: &Expr, steps: &[PathStep], scope: &Scope) -> EvalResult<Thunk> {
        let root = self.compile_expr(root, scope)?;
        let nested = scope.expression();
        let steps = steps
            .iter()
            .map(|step| self.compile_path_step(meta, step, &nested))
            .collect::<EvalResult<Vec<_>>>()?;

        Ok(self.factory.thunk_env(meta, move |env| {
            let mut current = root.eval(env)?;
            for step in &steps {
                current = step.eval(env, &current)?;
            }
            Ok(current)
        }))
    }

    fn compile_path_step(&self, meta: &Meta, step: &PathStep, scope: &Scope) -> EvalResult<ThunkEnvValue> {
        match step {
            PathStep::Field { name, case } => {
                let name = BindingName::new(name.clone(), *case);
                Ok(self.factory.thunk_env_value(meta, move |_, v| field_step(v, &name)))
            }
            PathStep::Index(index) => {
                let index = self.compile_expr(index, scope)?;
                Ok(self.factory.thunk_env_value(meta, move |env, v| {
                    let key = index.eval(env)?;
                    index_step(v, &key)
                }))
            }
        }
    }

    fn compile_nary(&self, meta: &Meta, op: NAryOp, args: &[Expr], scope: &Scope) -> EvalResult<Thunk> {
        let (min, max) = op.arity();
        if args.len() < min || max.map_or(false, |max| args.len() > max) {
            return Err(arity_error(op.symbol(), arity_text(min, max), args.len()));
        }
        let f = &self.factory;

        let thunk = match op {
            NAryOp::In | NAryOp::NotIn => return self.compile_in(meta, op, args, scope),
            NAryOp::Like | NAryOp::NotLike => return self.compile_like(meta, op, args, scope),
            NAryOp::Not => {
                let [a] = exact::<1>(op, self.compile_all(args, scope)?)?;
                f.thunk_operands_1(meta, a, helpers::not)
            }
            NAryOp::Neg => {
                let width = self.operands_width(args, scope);
                let [a] = exact::<1>(op, self.compile_all(args, scope)?)?;
                f.thunk_operands_1(meta, a, move |v| arith::negate(v, width))
            }
            NAryOp::Pos => {
                let [a] = exact::<1>(op, self.compile_all(args, scope)?)?;
                f.thunk_operands_1(meta, a, arith::identity)
            }
            NAryOp::Eq | NAryOp::Ne | NAryOp::Lt | NAryOp::Le | NAryOp::Gt | NAryOp::Ge => {
                let [a, b] = exact::<2>(op, self.compile_all(args, scope)?)?;
                f.thunk_operands_2(meta, a, b, move |x, y| helpers::compare(op, x, y))
            }
            NAryOp::Between => {
                let [x, lo, hi] = exact::<3>(op, self.compile_all(args, scope)?)?;
                f.thunk_operands_3(meta, x, lo, hi, helpers::between)
            }
            NAryOp::NotBetween => {
                let [x, lo, hi] = exact::<3>(op, self.compile_all(args, scope)?)?;
                f.thunk_operands_3(meta, x, lo, hi, |x, lo, hi| {
                    helpers::between(x, lo, hi).map(helpers::negate_bool)
                })
            }
            NAryOp::Add | NAryOp::Sub | NAryOp::Mul | NAryOp::Div | NAryOp::Mod => {
                let arith_op = match op {
                    NAryOp::Add => ArithOp::Add,
                    NAryOp::Sub => ArithOp::Sub,
                    NAryOp::Mul => ArithOp::Mul,
                    NAryOp::Div => ArithOp::Div,
                    _ => ArithOp::Mod,
                };
                let width = self.operands_width(args, scope);
                f.thunk_fold(meta, self.compile_all(args, scope)?, move |a, b| {
                    arith::arith(arith_op, a, b, width)
                })
            }
            NAryOp::Concat => f.thunk_fold(meta, self.compile_all(args, scope)?, helpers::concat),
            NAryOp::And => f.thunk_and_or(meta, LogicalOp::And, self.compile_all(args, scope)?),
            NAryOp::Or => f.thunk_and_or(meta, LogicalOp::Or, self.compile_all(args, scope)?),
        };
        Ok(thunk)
    }

    /// IN takes a precomputed sorted list when the right operand is all literals.
    fn compile_in(&self, meta: &Meta, op: NAryOp, args: &[Expr], scope: &Scope) -> EvalResult<Thunk> {
        let negated = op == NAryOp::NotIn;
        let finish = move |v: Value| if negated { helpers::negate_bool(v) } else { v };
        let needle = self.compile_expr(&args[0], scope)?;

        if let Some(literals) = self.literal_elements(&args[1])? {
            let list = InList::new(literals)?;
            return Ok(self
                .factory
                .thunk_operands_1(meta, needle, move |v| list.contains(v).map(finish)));
        }

        let haystack = self.compile_expr(&args[1], scope)?;
        Ok(self.factory.thunk_operands_2(meta, needle, haystack, move |n, h| {
            helpers::in_collection(n, h).map(finish)
        }))
    }

    /// LIKE compiles its regex once when pattern and escape are literals.
    fn compile_like(&self, meta: &Meta, op: NAryOp, args: &[Expr], scope: &Scope) -> EvalResult<Thunk> {
        let negated = op == NAryOp::NotLike;
        let finish = move |v: Value| if negated { helpers::negate_bool(v) } else { v };
        let value = self.compile_expr(&args[0], scope)?;

        let pattern_text = literal_text(&args[1]);
        let escape_text = match args.get(2) {
            None => Some(None),
            Some(e) => literal_text(e).map(Some),
        };
        if let (Some(pattern), Some(escape)) = (pattern_text, escape_text) {
            if let Ok(regex) = helpers::like_regex(&pattern, escape.as_deref()) {
                return Ok(self.factory.thunk_operands_1(meta, value, move |v| {
                    helpers::like_match(v, &regex).map(finish)
                }));
            }
        }

        let pattern = self.compile_expr(&args[1], scope)?;
        match args.get(2) {
            None => Ok(self.factory.thunk_operands_2(meta, value, pattern, move |v, p| {
                let regex = helpers::like_regex(helpers::like_text(p)?, None)?;
                helpers::like_match(v, &regex).map(finish)
            })),
            Some(escape) => {
                let escape = self.compile_expr(escape, scope)?;
                Ok(self.factory.thunk_operands_3(meta, value, pattern, escape, move |v, p, e| {
                    let regex = helpers::like_regex(helpers::like_text(p)?, Some(helpers::like_text(e)?))?;
                    helpers::like_match(v, &regex).map(finish)
                }))
            }
        }
    }

    fn compile_case(
        &self,
        meta: &Meta,
        operand: Option<&Expr>,
        branches: &[CaseBranch],
        default: Option<&Expr>,
        scope: &Scope,
    ) -> EvalResult<Thunk> {
        let operand = operand.map(|e| self.compile_expr(e, scope)).transpose()?;
        let branches = branches
            .iter()
            .map(|b| Ok((self.compile_expr(&b.when, scope)?, self.compile_expr(&b.then, scope)?)))
            .collect::<EvalResult<Vec<_>>>()?;
        let default = default.map(|e| self.compile_expr(e, scope)).transpose()?;

        Ok(self.factory.thunk_env(meta, move |env| {
            let subject = operand.as_ref().map(|t| t.eval(env)).transpose()?;
            for (when, then) in &branches {
                let candidate = when.eval(env)?;
                let hit = match &subject {
                    Some(subject) => sql_eq(subject, &candidate)? == Some(true),
                    None => candidate.as_bool() == Some(true),
                };
                if hit {
                    return then.eval(env);
                }
            }
            match &default {
                Some(default) => default.eval(env),
                None => Ok(Value::Null),
            }
        }))
    }

    fn compile_cast(&self, meta: &Meta, operand: &Expr, to: CastTarget, scope: &Scope) -> EvalResult<Thunk> {
        let operand = self.compile_expr(operand, scope)?;
        Ok(self.factory.thunk_env(meta, move |env| {
            let v = operand.eval(env)?;
            if v.is_unknown() {
                Ok(v)
            } else {
                helpers::cast(&v, to)
            }
        }))
    }

    fn compile_call(&self, meta: &Meta, name: &str, args: &[Expr], scope: &Scope) -> EvalResult<Thunk> {
        let builtin = builtins::lookup(name).ok_or_else(|| {
            EvalError::new(ErrorKind::UnknownFunction {
                name: name.to_string(),
            })
        })?;
        if !builtin.accepts(args.len()) {
            return Err(arity_error(builtin.name, builtin.arity_text(), args.len()));
        }
        let operands = self.compile_all(args, scope)?;

        match builtin.unknowns {
            UnknownHandling::Coalesce => {
                let factory = self.factory.clone();
                Ok(self.factory.thunk_env(meta, move |env| {
                    let mut all_missing = true;
                    for operand in &operands {
                        let v = operand.eval(env)?;
                        if !v.is_unknown() {
                            return Ok(v);
                        }
                        all_missing &= v.is_missing();
                    }
                    Ok(factory.coalesce_exhausted(all_missing))
                }))
            }
            UnknownHandling::Propagate => {
                let body = self.factory.thunk_env_value_list(meta, move |_, values| (builtin.call)(values));
                Ok(self.factory.thunk_operands_n(meta, operands, body))
            }
            UnknownHandling::Inspect => {
                let body = self.factory.thunk_env_value_list(meta, move |_, values| (builtin.call)(values));
                Ok(self.factory.thunk_env(meta, move |env| {
                    let values = operands
                        .iter()
                        .map(|t| t.eval(env))
                        .collect::<EvalResult<Vec<_>>>()?;
                    body.eval(env, &values)
                }))
            }
        }
    }

    fn compile_sequence(
        &self,
        meta: &Meta,
        items: &[Expr],
        scope: &Scope,
        make: fn(Vec<Value>) -> Value,
    ) -> EvalResult<Thunk> {
        let items = self.compile_all(items, scope)?;
        Ok(self.factory.thunk_env(meta, move |env| {
            let values = items
                .iter()
                .map(|t| t.eval(env))
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(make(values))
        }))
    }

    fn compile_struct(&self, meta: &Meta, fields: &[StructField], scope: &Scope) -> EvalResult<Thunk> {
        let fields = fields
            .iter()
            .map(|f| Ok((self.compile_expr(&f.name, scope)?, self.compile_expr(&f.value, scope)?)))
            .collect::<EvalResult<Vec<_>>>()?;

        Ok(self.factory.thunk_env(meta, move |env| {
            let mut out = Vec::with_capacity(fields.len());
            for (name, value) in &fields {
                let key = name.eval(env)?;
                let value = value.eval(env)?;
                let key = match key.as_text() {
                    Some(text) => text.to_string(),
                    None => return Err(EvalError::type_mismatch("struct constructor", "text field name", &key)),
                };
                if !value.is_missing() {
                    out.push((key, value));
                }
            }
            Ok(Value::Struct(StructValue::new(out)))
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ast::CaseBranch;
    use crate::bindings::MapBindings;
    use crate::compiler::compile;
    use crate::env::Session;
    use crate::error::{ErrorCode, SourceLocation};
    use crate::options::CompileOptions;
    use num_bigint::BigInt;

    fn eval_with(options: CompileOptions, expr: &Expr, globals: MapBindings<Value>) -> EvalResult<Value> {
        let session = Session::builder().globals(globals).build();
        compile(Arc::new(options), expr)?.evaluate_forced(&session)
    }

    fn eval(expr: &Expr) -> EvalResult<Value> {
        eval_with(CompileOptions::default(), expr, MapBindings::new())
    }

    fn eval_permissive(expr: &Expr) -> EvalResult<Value> {
        eval_with(CompileOptions::permissive(), expr, MapBindings::new())
    }

    fn ints(values: &[i64]) -> Vec<Expr> {
        values.iter().map(|n| Expr::int(*n)).collect()
    }

    #[test]
    fn test_literal_integer_overflow_is_a_compile_error() {
        let big: BigInt = "9223372036854775808".parse().unwrap();
        let expr = Expr::lit(Literal::Int(big)).at(3, 14);
        let err = compile(Arc::new(CompileOptions::permissive()), &expr).err().unwrap();
        assert_eq!(err.code(), ErrorCode::LiteralIntegerOverflow);
        assert_eq!(err.location(), Some(SourceLocation::new(3, 14)));
    }

    #[test]
    fn test_undefined_variable_policies() {
        let expr = Expr::var("nope").at(1, 8);
        let err = eval(&expr).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UndefinedVariable);
        assert_eq!(err.location(), Some(SourceLocation::new(1, 8)));
        assert_eq!(eval_permissive(&expr).unwrap(), Value::Missing);

        let options = CompileOptions::builder()
            .undefined_variable(UndefinedVariableBehavior::Missing)
            .build();
        assert_eq!(eval_with(options, &expr, MapBindings::new()).unwrap(), Value::Missing);
    }

    #[test]
    fn test_ambiguous_global_is_definite_in_permissive_mode() {
        let globals = MapBindings::new().with("A", Value::Int(1)).with("a", Value::Int(2));
        let err = eval_with(CompileOptions::permissive(), &Expr::var("a"), globals).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AmbiguousBinding);
    }

    #[test]
    fn test_path_steps() {
        let doc = Value::structure(vec![(
            "a",
            Value::structure(vec![("b", Value::list(vec![Value::Int(10), Value::Int(20)]))]),
        )]);
        let globals = MapBindings::new().with("doc", doc);
        let path = Expr::new(ExprKind::Path {
            root: Box::new(Expr::var("doc")),
            steps: vec![
                PathStep::Field {
                    name: "A".into(),
                    case: CaseSensitivity::Insensitive,
                },
                PathStep::Field {
                    name: "b".into(),
                    case: CaseSensitivity::Sensitive,
                },
                PathStep::Index(Box::new(Expr::int(1))),
            ],
        });
        assert_eq!(eval_with(CompileOptions::default(), &path, globals.clone()).unwrap(), Value::Int(20));

        let missing = Expr::path(Expr::var("doc"), &["a", "zzz", "b"]);
        assert_eq!(eval_with(CompileOptions::default(), &missing, globals).unwrap(), Value::Missing);
    }

    #[test]
    fn test_parameters() {
        let session = Session::builder().parameter(Value::Int(5)).build();
        let query = compile(Arc::new(CompileOptions::permissive()), &Expr::new(ExprKind::Param(2))).unwrap();
        let err = query.evaluate(&session).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnboundParameter);
    }

    #[test]
    fn test_invalid_arity_is_rejected_at_compile_time() {
        let expr = Expr::nary(NAryOp::Between, ints(&[1, 2]));
        let err = compile(Arc::new(CompileOptions::default()), &expr).err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidArity);

        let err = compile(Arc::new(CompileOptions::default()), &Expr::call("nullif", ints(&[1])))
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidArity);

        let err = compile(Arc::new(CompileOptions::default()), &Expr::call("soundex", ints(&[1])))
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::UnknownFunction);
    }

    #[test]
    fn test_arithmetic_fold_and_type_mismatch() {
        let sum = Expr::nary(NAryOp::Add, ints(&[1, 2, 3]));
        assert_eq!(eval(&sum).unwrap(), Value::Int(6));

        let bad = Expr::nary(NAryOp::Add, vec![Expr::int(1), Expr::string("x")]);
        assert!(eval(&bad).unwrap_err().is_data_condition());
        assert_eq!(eval_permissive(&bad).unwrap(), Value::Missing);

        let zero = Expr::nary(NAryOp::Div, ints(&[1, 0]));
        assert_eq!(eval_permissive(&zero).unwrap_err().code(), ErrorCode::DivideByZero);
    }

    #[test]
    fn test_unknown_propagation_by_mode() {
        let expr = Expr::nary(NAryOp::Add, vec![Expr::int(1), Expr::missing()]);
        assert_eq!(eval(&expr).unwrap(), Value::Null);
        assert_eq!(eval_permissive(&expr).unwrap(), Value::Missing);
    }

    #[test]
    fn test_in_literal_and_computed_paths_agree() {
        let literal = Expr::nary(NAryOp::In, vec![Expr::int(0), Expr::new(ExprKind::List(ints(&[1, 2, 3])))]);
        let computed = Expr::nary(
            NAryOp::In,
            vec![
                Expr::int(0),
                Expr::new(ExprKind::List(vec![
                    Expr::int(1),
                    Expr::nary(NAryOp::Add, ints(&[1, 1])),
                    Expr::int(3),
                ])),
            ],
        );
        assert_eq!(eval(&literal).unwrap(), Value::Bool(false));
        assert_eq!(eval(&literal).unwrap(), eval(&computed).unwrap());

        let with_null = |needle: i64| {
            Expr::nary(
                NAryOp::In,
                vec![Expr::int(needle), Expr::new(ExprKind::Bag(vec![Expr::int(1), Expr::null()]))],
            )
        };
        assert_eq!(eval(&with_null(1)).unwrap(), Value::Bool(true));
        assert_eq!(eval(&with_null(2)).unwrap(), Value::Null);

        let not_in = Expr::nary(NAryOp::NotIn, vec![Expr::int(0), Expr::new(ExprKind::List(ints(&[1])))]);
        assert_eq!(eval(&not_in).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_like_literal_and_dynamic_patterns() {
        let like = |pattern: Expr| Expr::nary(NAryOp::Like, vec![Expr::string("a_c"), pattern]);
        assert_eq!(eval(&like(Expr::string("a%"))).unwrap(), Value::Bool(true));
        assert_eq!(eval(&like(Expr::string("b%"))).unwrap(), Value::Bool(false));

        let dynamic = like(Expr::call("lower", vec![Expr::string("A%")]));
        assert_eq!(eval(&dynamic).unwrap(), Value::Bool(true));

        let escaped = Expr::nary(
            NAryOp::Like,
            vec![Expr::string("a_c"), Expr::string("a!_c"), Expr::string("!")],
        );
        assert_eq!(eval(&escaped).unwrap(), Value::Bool(true));
        let escaped_miss = Expr::nary(
            NAryOp::Like,
            vec![Expr::string("abc"), Expr::string("a!_c"), Expr::string("!")],
        );
        assert_eq!(eval(&escaped_miss).unwrap(), Value::Bool(false));

        let bad_escape = Expr::nary(
            NAryOp::Like,
            vec![Expr::string("abc"), Expr::string("a!"), Expr::string("!")],
        );
        assert!(eval(&bad_escape).unwrap_err().is_data_condition());
    }

    #[test]
    fn test_case_and_cast() {
        let searched = Expr::new(ExprKind::Case {
            operand: None,
            branches: vec![
                CaseBranch {
                    when: Expr::nary(NAryOp::Lt, ints(&[2, 1])),
                    then: Expr::string("no"),
                },
                CaseBranch {
                    when: Expr::nary(NAryOp::Lt, ints(&[1, 2])),
                    then: Expr::string("yes"),
                },
            ],
            default: None,
        });
        assert_eq!(eval(&searched).unwrap(), Value::string("yes"));

        let simple = Expr::new(ExprKind::Case {
            operand: Some(Box::new(Expr::int(3))),
            branches: vec![CaseBranch {
                when: Expr::int(4),
                then: Expr::string("four"),
            }],
            default: None,
        });
        assert_eq!(eval(&simple).unwrap(), Value::Null);

        let cast = |operand: Expr, to| {
            Expr::new(ExprKind::Cast {
                operand: Box::new(operand),
                to,
            })
        };
        assert_eq!(eval(&cast(Expr::string(" 42 "), CastTarget::Int)).unwrap(), Value::Int(42));
        assert_eq!(eval(&cast(Expr::missing(), CastTarget::Int)).unwrap(), Value::Missing);
        let err = eval(&cast(Expr::string("x"), CastTarget::Int)).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::CastFailed {
                from: ValueType::String,
                to: ValueType::Int
            }
        );
        assert_eq!(eval_permissive(&cast(Expr::string("x"), CastTarget::Int)).unwrap(), Value::Missing);
    }

    #[test]
    fn test_coalesce_unknown_conventions() {
        let coalesce = |args: Vec<Expr>| Expr::call("coalesce", args);
        let m = Expr::missing;
        let n = Expr::null;

        for eval_fn in [eval, eval_permissive] {
            assert_eq!(eval_fn(&coalesce(vec![m(), n(), m()])).unwrap(), Value::Null);
            assert_eq!(eval_fn(&coalesce(vec![n(), m()])).unwrap(), Value::Null);
            let mixed = coalesce(vec![n(), m(), n(), n(), Expr::int(2), Expr::int(3)]);
            assert_eq!(eval_fn(&mixed).unwrap(), Value::Int(2));
        }
        assert_eq!(eval_permissive(&coalesce(vec![m()])).unwrap(), Value::Missing);
        assert_eq!(eval_permissive(&coalesce(vec![m(), m()])).unwrap(), Value::Missing);
        assert_eq!(eval(&coalesce(vec![m()])).unwrap(), Value::Null);
    }

    #[test]
    fn test_struct_constructor_omits_missing() {
        let expr = Expr::new(ExprKind::Struct(vec![
            StructField {
                name: Expr::string("a"),
                value: Expr::int(1),
            },
            StructField {
                name: Expr::string("b"),
                value: Expr::missing(),
            },
        ]));
        assert_eq!(eval(&expr).unwrap(), Value::structure(vec![("a", Value::Int(1))]));

        let bad_key = Expr::new(ExprKind::Struct(vec![StructField {
            name: Expr::int(1),
            value: Expr::int(1),
        }]));
        assert!(eval(&bad_key).unwrap_err().is_data_condition());
    }

    #[test]
    fn test_is_type() {
        let is = |operand: Expr, ty, negated| {
            Expr::new(ExprKind::IsType {
                operand: Box::new(operand),
                ty,
                negated,
            })
        };
        assert_eq!(eval(&is(Expr::missing(), ValueType::Null, false)).unwrap(), Value::Bool(true));
        assert_eq!(eval(&is(Expr::null(), ValueType::Missing, false)).unwrap(), Value::Bool(false));
        assert_eq!(eval(&is(Expr::int(1), ValueType::Int, true)).unwrap(), Value::Bool(false));
    }
}
