// Tests for deferred evaluation, cooperative cancellation and concurrent use
mod common;

use common::*;
use nestql_core::ast::{Expr, ExprKind, FromSource, JoinKind, NAryOp, Select};
use nestql_core::value::ValueIter;
use nestql_core::{
    compile, CancellationToken, CompileOptions, EvalResult, LazyBindingsBuilder, MapBindings, Seq,
    Session, Value,
};
use rayon::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn unbounded() -> Value {
    Value::Bag(Seq::deferred(|| -> ValueIter { Box::new((0..).map(|i| Ok(Value::Int(i)))) }))
}

fn doubled(source: &str) -> Expr {
    Expr::select(select_value(
        op(NAryOp::Mul, vec![var("x"), Expr::int(2)]),
        scan(source, "x"),
    ))
}

#[test]
fn test_evaluate_defers_the_scan() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let globals = LazyBindingsBuilder::new()
        .add("src", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::list(vec![Value::Int(1), Value::Int(2)]))
        })
        .build();
    let session = Session::builder().globals(globals).build();

    let result = compile(Arc::new(CompileOptions::default()), &doubled("src"))
        .unwrap()
        .evaluate(&session)
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let seq = result.as_seq().unwrap();
    let first: Vec<Value> = seq.iter().collect::<EvalResult<_>>().unwrap();
    let second: Vec<Value> = seq.iter().collect::<EvalResult<_>>().unwrap();
    assert_eq!(first, vec![Value::Int(2), Value::Int(4)]);
    assert_eq!(first, second);
    // The supplier result is cached by the global bindings
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unbounded_source_with_limit() {
    let query = Expr::select(Select {
        limit: Some(Box::new(Expr::int(3))),
        ..select_value(var("x"), scan("inf", "x"))
    });
    let session = Session::builder()
        .globals(MapBindings::new().with("inf", unbounded()))
        .build();
    let result = compile(Arc::new(CompileOptions::default()), &query)
        .unwrap()
        .evaluate_forced(&session)
        .unwrap();
    assert_eq!(result, Value::bag(vec![Value::Int(0), Value::Int(1), Value::Int(2)]));
}

#[test]
fn test_cancellation_interrupts_iteration() {
    let token = CancellationToken::new();
    let session = Session::builder()
        .globals(MapBindings::new().with("inf", unbounded()))
        .cancellation(token.clone())
        .build();
    let result = compile(Arc::new(CompileOptions::permissive()), &doubled("inf"))
        .unwrap()
        .evaluate(&session)
        .unwrap();

    let mut iter = result.as_seq().unwrap().iter();
    for expected in 0..10 {
        assert_eq!(iter.next().unwrap().unwrap(), Value::Int(expected * 2));
    }

    token.cancel();
    let err = iter.next().unwrap().unwrap_err();
    assert!(err.is_interrupted());
    assert!(!err.is_data_condition());
    assert!(iter.next().is_none());
}

#[test]
fn test_cancellation_stops_cross_product() {
    // Unbounded on both sides: only the token ends this join.
    let query = Expr::select(select_value(
        var("a"),
        FromSource::Join {
            kind: JoinKind::Left,
            left: Box::new(scan("inf", "a")),
            right: Box::new(scan("inf", "b")),
            on: Some(Box::new(Expr::nary(NAryOp::Lt, vec![var("b"), Expr::int(0)]))),
        },
    ));
    let token = CancellationToken::new();
    let session = Session::builder()
        .globals(MapBindings::new().with("inf", unbounded()))
        .cancellation(token.clone())
        .build();
    let result = compile(Arc::new(CompileOptions::default()), &query)
        .unwrap()
        .evaluate(&session)
        .unwrap();

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        token.cancel();
    });
    let err = result.force().unwrap_err();
    canceller.join().unwrap();
    assert!(err.is_interrupted());
}

#[test]
fn test_cancellation_interrupts_a_comparison() {
    // Comparing an unbounded subquery against a bag never finishes on its own
    let query = Expr::nary(
        NAryOp::Eq,
        vec![
            Expr::select(select_value(var("x"), scan("inf", "x"))),
            Expr::new(ExprKind::Bag(vec![])),
        ],
    );
    let token = CancellationToken::new();
    let session = Session::builder()
        .globals(MapBindings::new().with("inf", unbounded()))
        .cancellation(token.clone())
        .build();
    let compiled = compile(Arc::new(CompileOptions::permissive()), &query).unwrap();

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        token.cancel();
    });
    let err = compiled.evaluate(&session).unwrap_err();
    canceller.join().unwrap();
    assert!(err.is_interrupted());
    assert!(!err.is_data_condition());
}

#[test]
fn test_compiled_query_is_shared_across_threads() {
    let query = Arc::new(compile(Arc::new(CompileOptions::default()), &doubled("rows")).unwrap());

    let totals: Vec<i64> = (0..64i64)
        .into_par_iter()
        .map(|n| {
            let rows: Vec<serde_json::Value> = (0..n).map(|i| json!(i)).collect();
            let result = query
                .evaluate_forced(&session(json!({ "rows": rows })))
                .unwrap();
            let values = result.as_seq().unwrap().force().unwrap();
            values.iter().map(|v| v.as_i64().unwrap()).sum()
        })
        .collect();

    for (n, total) in totals.into_iter().enumerate() {
        let n = n as i64;
        assert_eq!(total, n * (n - 1));
    }
}
