// Tests for strict vs permissive evaluation, name resolution and the total order
mod common;

use common::*;
use nestql_core::ast::{Expr, NAryOp};
use nestql_core::{
    compile_with_types, sort_cmp, total_cmp, BindingName, Bindings, CompileOptions, ErrorCode,
    ErrorKind, IntWidth, LazyBindingsBuilder, MapBindings, NullOrder, Session, SortOrder,
    StaticType, StructValue, Value,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn coalesce(args: Vec<Expr>) -> Expr {
    Expr::call("coalesce", args)
}

// ==================== COALESCE ====================

#[test]
fn test_coalesce_unknown_conventions() {
    let m = Expr::missing;
    let n = Expr::null;

    // Identical in both modes
    for eval in [eval_strict, eval_permissive] {
        assert_eq!(eval(&coalesce(vec![m(), n(), m()]), json!({})).unwrap(), Value::Null);
        assert_eq!(eval(&coalesce(vec![n(), m()]), json!({})).unwrap(), Value::Null);
        let args = vec![n(), m(), n(), n(), Expr::int(2), Expr::int(3)];
        assert_eq!(eval(&coalesce(args), json!({})).unwrap(), Value::Int(2));
    }

    // All-MISSING stays MISSING only in permissive mode
    assert_eq!(eval_permissive(&coalesce(vec![m()]), json!({})).unwrap(), Value::Missing);
    assert_eq!(eval_permissive(&coalesce(vec![m(), m()]), json!({})).unwrap(), Value::Missing);
    assert_eq!(eval_strict(&coalesce(vec![m(), m()]), json!({})).unwrap(), Value::Null);
}

// ==================== Typed overflow ====================

#[test]
fn test_sixteen_bit_overflow() {
    let int2 = || StaticType::Int(IntWidth::Int2);
    let add_one = Expr::nary(
        NAryOp::Add,
        vec![Expr::var("x"), Expr::int(1).typed(int2())],
    );
    let types: Arc<dyn Bindings<StaticType>> = Arc::new(MapBindings::new().with("x", int2()));
    let eval = |options: CompileOptions, x: i64| {
        let session = Session::builder()
            .globals(MapBindings::new().with("x", Value::Int(x)))
            .build();
        compile_with_types(Arc::new(options), types.clone(), &add_one)
            .unwrap()
            .evaluate(&session)
    };

    let max = i16::MAX as i64;
    assert_eq!(eval(CompileOptions::permissive(), max).unwrap(), Value::Missing);
    assert_eq!(
        eval(CompileOptions::default(), max).unwrap_err().kind(),
        &ErrorKind::IntegerOverflow {
            width: IntWidth::Int2
        }
    );
    assert_eq!(eval(CompileOptions::default(), max - 1).unwrap(), Value::Int(max));
    assert_eq!(eval(CompileOptions::permissive(), max - 1).unwrap(), Value::Int(max));
}

#[test]
fn test_unconstrained_overflow_without_types() {
    let expr = Expr::nary(NAryOp::Add, vec![Expr::var("x"), Expr::int(1)]);
    let data = json!({"x": i64::MAX});
    assert_eq!(eval_strict(&expr, data.clone()).unwrap_err().code(), ErrorCode::IntegerOverflow);
    assert_eq!(eval_permissive(&expr, data).unwrap(), Value::Missing);
}

// ==================== Definite faults ====================

#[test]
fn test_division_by_zero_raises_in_both_modes() {
    let div = Expr::nary(NAryOp::Div, vec![Expr::int(1), Expr::int(0)]);
    let rem = Expr::nary(NAryOp::Mod, vec![Expr::int(1), Expr::int(0)]);
    for eval in [eval_strict, eval_permissive] {
        assert_eq!(eval(&div, json!({})).unwrap_err().code(), ErrorCode::DivideByZero);
        assert_eq!(eval(&rem, json!({})).unwrap_err().code(), ErrorCode::ModuloByZero);
    }
}

#[test]
fn test_return_type_assertion_is_never_converted() {
    let expr = Expr::int(1).typed(StaticType::String);
    for eval in [eval_strict, eval_permissive] {
        assert_eq!(eval(&expr, json!({})).unwrap_err().code(), ErrorCode::ReturnTypeMismatch);
    }
}

#[test]
fn test_type_mismatch_is_a_data_condition() {
    let expr = Expr::nary(NAryOp::Add, vec![Expr::string("a"), Expr::int(1)]);
    let err = eval_strict(&expr, json!({})).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TypeMismatch);
    assert!(err.is_data_condition());
    assert_eq!(eval_permissive(&expr, json!({})).unwrap(), Value::Missing);
}

#[test]
fn test_unbound_parameter_reports_ordinal() {
    let expr = Expr::new(nestql_core::ast::ExprKind::Param(2));
    let session = Session::builder().parameter(Value::Int(1)).build();
    let err = nestql_core::compile(Arc::new(CompileOptions::permissive()), &expr)
        .unwrap()
        .evaluate(&session)
        .unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::UnboundParameter {
            ordinal: 2,
            bound: 1
        }
    );
}

// ==================== Name resolution ====================

#[test]
fn test_case_policies_agree_on_unique_fields() {
    let s = StructValue::new(vec![
        ("Alpha".to_string(), Value::Int(1)),
        ("beta".to_string(), Value::Int(2)),
    ]);
    assert_eq!(
        s.get(&BindingName::sensitive("Alpha")).unwrap(),
        s.get(&BindingName::insensitive("ALPHA")).unwrap()
    );
    assert_eq!(s.get(&BindingName::sensitive("alpha")).unwrap(), None);
}

#[test]
fn test_insensitive_ambiguity_lists_matches_in_order() {
    let s = StructValue::new(vec![
        ("Name".to_string(), Value::Int(1)),
        ("other".to_string(), Value::Int(2)),
        ("NAME".to_string(), Value::Int(3)),
    ]);
    let err = s.get(&BindingName::insensitive("name")).unwrap_err();
    match err.kind() {
        ErrorKind::AmbiguousBinding { matches, .. } => {
            assert_eq!(matches, &vec!["Name".to_string(), "NAME".to_string()]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(s.get(&BindingName::sensitive("NAME")).unwrap(), Some(Value::Int(3)));
}

#[test]
fn test_lazy_global_supplier_runs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let lazy = LazyBindingsBuilder::new()
        .add("Data", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(42))
        })
        .build();
    let session = Session::builder().globals(lazy).build();

    let mut data = Expr::var("Data");
    if let nestql_core::ast::ExprKind::Var { case, .. } = &mut data.kind {
        *case = nestql_core::CaseSensitivity::Sensitive;
    }
    let sum = Expr::nary(NAryOp::Add, vec![data, Expr::var("data"), Expr::var("DATA")]);
    let result = nestql_core::compile(Arc::new(CompileOptions::default()), &sum)
        .unwrap()
        .evaluate(&session)
        .unwrap();

    assert_eq!(result, Value::Int(126));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_undefined_variable_by_mode() {
    let expr = Expr::var("nope");
    assert_eq!(
        eval_strict(&expr, json!({})).unwrap_err().code(),
        ErrorCode::UndefinedVariable
    );
    assert_eq!(eval_permissive(&expr, json!({})).unwrap(), Value::Missing);
}

// ==================== Total order ====================

fn sorted(values: &[Value], nulls: NullOrder) -> Vec<Value> {
    let mut values = values.to_vec();
    values.sort_by(|a, b| sort_cmp(a, b, SortOrder::Asc, nulls).unwrap());
    values
}

#[test]
fn test_null_placement_only_moves_unknowns() {
    let values = vec![
        Value::Int(3),
        Value::Null,
        Value::string("x"),
        Value::Missing,
        Value::Bool(true),
        Value::Float(-1.5),
    ];
    let first = sorted(&values, NullOrder::First);
    let last = sorted(&values, NullOrder::Last);

    let (unknown, known): (Vec<_>, Vec<_>) = first.into_iter().partition(Value::is_unknown);
    let moved: Vec<Value> = known.into_iter().chain(unknown).collect();
    assert_eq!(moved.len(), last.len());
    for (a, b) in moved.iter().zip(last.iter()) {
        assert_eq!(total_cmp(a, b).unwrap(), std::cmp::Ordering::Equal);
    }
}

#[test]
fn test_scalar_order_chain() {
    use std::cmp::Ordering::Less;

    assert_eq!(total_cmp(&Value::Bool(false), &Value::Bool(true)).unwrap(), Less);
    let chain = [
        Value::Float(f64::NAN),
        Value::Float(f64::NEG_INFINITY),
        Value::Int(-1),
        Value::Int(0),
        Value::Int(1),
        Value::Float(f64::INFINITY),
    ];
    for pair in chain.windows(2) {
        assert_eq!(total_cmp(&pair[0], &pair[1]).unwrap(), Less, "{} < {}", pair[0], pair[1]);
    }
    assert_eq!(total_cmp(&Value::Null, &Value::Bool(false)).unwrap(), Less);
    assert_eq!(total_cmp(&Value::Int(1), &Value::Float(1.0)).unwrap(), std::cmp::Ordering::Equal);
}
