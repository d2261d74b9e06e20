//! Evaluate a serialized query tree against JSON data.

use std::sync::Arc;

use anyhow::Context;
use nestql_core::ast::Expr;
use nestql_core::{compile, CancellationToken, CompileOptions, MapBindings, Session, Value};
use serde_json::Value as JsonValue;

/// Everything one CLI invocation evaluates.
pub struct Request {
    pub query: Expr,
    pub globals: MapBindings<Value>,
    pub parameters: Vec<Value>,
}

impl Request {
    /// Parse the query tree, the data object (each top-level field is one
    /// global) and positional parameters, all given as JSON text.
    pub fn from_json(query: &str, data: Option<&str>, params: &[String]) -> anyhow::Result<Self> {
        let query: Expr = serde_json::from_str(query).context("invalid query tree")?;

        let mut globals = MapBindings::new();
        if let Some(data) = data {
            let data: JsonValue = serde_json::from_str(data).context("invalid data file")?;
            match data {
                JsonValue::Object(map) => {
                    for (name, value) in &map {
                        globals.insert(name.clone(), Value::from_json(value));
                    }
                }
                other => anyhow::bail!("data must be a JSON object, got {}", json_kind(&other)),
            }
        }

        let parameters = params
            .iter()
            .enumerate()
            .map(|(i, text)| {
                serde_json::from_str::<JsonValue>(text)
                    .map(|json| Value::from_json(&json))
                    .with_context(|| format!("invalid parameter {}", i + 1))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            query,
            globals,
            parameters,
        })
    }
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Compile once, evaluate, materialize and render the result as JSON.
///
/// Evaluation errors are returned as [`nestql_core::EvalError`] inside the
/// `anyhow::Error` so callers can inspect their code and location.
pub fn run(
    options: Arc<CompileOptions>,
    request: Request,
    cancellation: CancellationToken,
) -> anyhow::Result<JsonValue> {
    let compiled = compile(options, &request.query)?;
    let session = Session::builder()
        .globals(request.globals)
        .parameters(request.parameters)
        .cancellation(cancellation)
        .build();

    let result = compiled.evaluate_forced(&session)?;
    tracing::info!(result_type = %result.value_type(), "query evaluated");
    Ok(result.to_json()?)
}
