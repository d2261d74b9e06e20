//! Aggregate functions over the member rows of a group.

use std::cmp::Ordering;

use super::arith;
use super::thunk::{Thunk, ThunkFactory};
use super::{AggContext, Compiler, Scope};
use crate::ast::{AggregateFunc, Expr, ExprKind, Meta, PathStep, ProjectItem, Projection, SetQuantifier};
use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::value::{key_eq, total_cmp, try_sort_by, Value};

fn misuse(func: AggregateFunc, reason: &'static str) -> EvalError {
    EvalError::new(ErrorKind::AggregateMisuse {
        function: func.name().to_string(),
        reason,
    })
}

/// Whether `expr` calls an aggregate outside of any nested query.
pub(super) fn contains_aggregate(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Aggregate { .. } => true,
        ExprKind::Lit(_) | ExprKind::Var { .. } | ExprKind::Param(_) | ExprKind::Select(_) => false,
        ExprKind::Path { root, steps } => {
            contains_aggregate(root)
                || steps
                    .iter()
                    .any(|step| matches!(step, PathStep::Index(e) if contains_aggregate(e)))
        }
        ExprKind::NAry { args, .. } | ExprKind::Call { args, .. } => args.iter().any(contains_aggregate),
        ExprKind::List(items) | ExprKind::Sexp(items) | ExprKind::Bag(items) => {
            items.iter().any(contains_aggregate)
        }
        ExprKind::IsType { operand, .. } | ExprKind::Cast { operand, .. } => contains_aggregate(operand),
        ExprKind::Case {
            operand,
            branches,
            default,
        } => {
            operand.as_deref().map_or(false, contains_aggregate)
                || branches
                    .iter()
                    .any(|b| contains_aggregate(&b.when) || contains_aggregate(&b.then))
                || default.as_deref().map_or(false, contains_aggregate)
        }
        ExprKind::Struct(fields) => fields
            .iter()
            .any(|f| contains_aggregate(&f.name) || contains_aggregate(&f.value)),
    }
}

pub(super) fn projection_has_aggregate(projection: &Projection) -> bool {
    match projection {
        Projection::Star => false,
        Projection::Items(items) => items.iter().any(|item| match item {
            ProjectItem::Expr { expr, .. } | ProjectItem::All(expr) => contains_aggregate(expr),
        }),
        Projection::Value(expr) => contains_aggregate(expr),
        Projection::Pivot { value, key } => contains_aggregate(value) || contains_aggregate(key),
    }
}

/// Fold the known argument values of one group.
fn accumulate(func: AggregateFunc, values: Vec<Value>) -> EvalResult<Value> {
    match func {
        AggregateFunc::Count => Ok(Value::Int(values.len() as i64)),
        AggregateFunc::Sum => Ok(arith::sum(values.iter())?.unwrap_or(Value::Null)),
        AggregateFunc::Avg => match arith::sum(values.iter())? {
            Some(total) => arith::average(&total, values.len()),
            None => Ok(Value::Null),
        },
        AggregateFunc::Min => extreme(values, Ordering::Less),
        AggregateFunc::Max => extreme(values, Ordering::Greater),
    }
}

/// The first value that orders `wanted` against every other, NULL for none.
fn extreme(values: Vec<Value>, wanted: Ordering) -> EvalResult<Value> {
    let mut best: Option<Value> = None;
    for v in values {
        best = match best {
            Some(current) if total_cmp(&v, &current)? != wanted => Some(current),
            _ => Some(v),
        };
    }
    Ok(best.unwrap_or(Value::Null))
}

impl<F: ThunkFactory> Compiler<F> {
    pub(super) fn compile_aggregate(
        &self,
        meta: &Meta,
        func: AggregateFunc,
        quantifier: SetQuantifier,
        arg: Option<&Expr>,
        scope: &Scope,
    ) -> EvalResult<Thunk> {
        let rows = match (scope.aggregates, &scope.group) {
            (AggContext::InsideAggregate, _) => return Err(misuse(func, "aggregates cannot be nested")),
            (AggContext::Allowed, Some(group)) => group.rows.aggregates(AggContext::InsideAggregate),
            _ => {
                return Err(misuse(
                    func,
                    "only allowed in the SELECT, HAVING or ORDER BY clause of a query",
                ))
            }
        };
        let arg = match arg {
            Some(arg) => Some(self.compile_expr(arg, &rows)?),
            None if func == AggregateFunc::Count => None,
            None => return Err(misuse(func, "an argument is required")),
        };
        let distinct = quantifier == SetQuantifier::Distinct;

        Ok(self.factory.thunk_env(meta, move |env| {
            let group = env
                .group()
                .ok_or_else(|| misuse(func, "evaluated outside of a group"))?;
            let arg = match &arg {
                Some(arg) => arg,
                None => return Ok(Value::Int(group.members.len() as i64)),
            };

            let mut values = Vec::with_capacity(group.members.len());
            for member in group.members.iter() {
                let v = arg.eval(member)?;
                if !v.is_unknown() {
                    values.push(v);
                }
            }
            if distinct {
                try_sort_by(&mut values, Value::force, total_cmp)?;
                let mut unique: Vec<Value> = Vec::with_capacity(values.len());
                for v in values {
                    match unique.last() {
                        Some(last) if key_eq(last, &v)? => {}
                        _ => unique.push(v),
                    }
                }
                values = unique;
            }
            accumulate(func, values)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NAryOp, Select};

    fn count_star() -> Expr {
        Expr::new(ExprKind::Aggregate {
            func: AggregateFunc::Count,
            quantifier: SetQuantifier::All,
            arg: None,
        })
    }

    #[test]
    fn test_contains_aggregate_skips_subqueries() {
        assert!(contains_aggregate(&Expr::nary(NAryOp::Add, vec![count_star(), Expr::int(1)])));
        let subquery = Expr::select(Select {
            projection: Projection::Value(Box::new(count_star())),
            ..Select::default()
        });
        assert!(!contains_aggregate(&subquery));
        assert!(projection_has_aggregate(&Projection::Value(Box::new(count_star()))));
        assert!(!projection_has_aggregate(&Projection::Star));
    }

    #[test]
    fn test_accumulate() {
        let values = vec![Value::Int(3), Value::Int(1), Value::Float(2.5)];
        assert_eq!(accumulate(AggregateFunc::Count, values.clone()).unwrap(), Value::Int(3));
        assert_eq!(accumulate(AggregateFunc::Sum, values.clone()).unwrap(), Value::Float(6.5));
        assert_eq!(accumulate(AggregateFunc::Min, values.clone()).unwrap(), Value::Int(1));
        assert_eq!(accumulate(AggregateFunc::Max, values).unwrap(), Value::Int(3));
        assert_eq!(accumulate(AggregateFunc::Avg, vec![]).unwrap(), Value::Null);
        assert!(accumulate(AggregateFunc::Sum, vec![Value::string("x")])
            .unwrap_err()
            .is_data_condition());
    }
}
