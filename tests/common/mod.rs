//! Common test utilities for nestql tests
//!
//! Provides shared helper functions for:
//! - Building query trees
//! - Creating sessions from JSON data
//! - Evaluating in either typing mode

#![allow(dead_code)]

use std::sync::Arc;

use nestql_core::ast::{
    AggregateFunc, Expr, ExprKind, FromSource, NAryOp, Projection, Select, SetQuantifier,
};
use nestql_core::{compile, CompileOptions, EvalResult, MapBindings, Session, Value};

/// Globals from a JSON object: each top-level field becomes one binding.
pub fn globals(data: serde_json::Value) -> MapBindings<Value> {
    match data {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect(),
        other => panic!("globals must be a JSON object, got {}", other),
    }
}

pub fn session(data: serde_json::Value) -> Arc<Session> {
    Session::builder().globals(globals(data)).build()
}

pub fn eval_with(options: CompileOptions, expr: &Expr, data: serde_json::Value) -> EvalResult<Value> {
    compile(Arc::new(options), expr)?.evaluate_forced(&session(data))
}

pub fn eval_strict(expr: &Expr, data: serde_json::Value) -> EvalResult<Value> {
    eval_with(CompileOptions::default(), expr, data)
}

pub fn eval_permissive(expr: &Expr, data: serde_json::Value) -> EvalResult<Value> {
    eval_with(CompileOptions::permissive(), expr, data)
}

/// Evaluate in strict mode and render as JSON.
pub fn eval_json(expr: &Expr, data: serde_json::Value) -> serde_json::Value {
    eval_strict(expr, data)
        .expect("query failed")
        .to_json()
        .expect("result not renderable")
}

// Tree builders

pub fn var(name: &str) -> Expr {
    Expr::var(name)
}

/// `root.f1.f2...` where `root` is a variable name.
pub fn field(root: &str, path: &[&str]) -> Expr {
    Expr::path(Expr::var(root), path)
}

pub fn op(op: NAryOp, args: Vec<Expr>) -> Expr {
    Expr::nary(op, args)
}

pub fn eq(a: Expr, b: Expr) -> Expr {
    Expr::nary(NAryOp::Eq, vec![a, b])
}

pub fn scan(source: &str, alias: &str) -> FromSource {
    FromSource::scan(Expr::var(source), alias)
}

pub fn aggregate(func: AggregateFunc, arg: Option<Expr>) -> Expr {
    Expr::new(ExprKind::Aggregate {
        func,
        quantifier: SetQuantifier::All,
        arg: arg.map(Box::new),
    })
}

pub fn count_star() -> Expr {
    aggregate(AggregateFunc::Count, None)
}

/// `SELECT VALUE <value> FROM <from>`
pub fn select_value(value: Expr, from: FromSource) -> Select {
    Select {
        projection: Projection::Value(Box::new(value)),
        from: Some(from),
        ..Select::default()
    }
}

/// Bag of JSON values, for comparing against bag results.
pub fn bag(items: Vec<serde_json::Value>) -> Value {
    Value::bag(items.iter().map(Value::from_json).collect())
}
