//! nestql core - storage-independent evaluation of SQL-compatible queries over nested data.
//!
//! Query trees ([`ast::Expr`]) are compiled once into reusable thunks and then
//! evaluated against a [`Session`] holding global bindings, positional
//! parameters and a cancellation token.
//!
//! # Main Components
//!
//! - **Value**: NULL, MISSING, scalars, ordered and unordered collections, structs
//! - **Bindings**: name resolution with case sensitivity and lazy suppliers
//! - **Compiler**: strict (legacy) or permissive thunk construction
//! - **Builtins**: storage-independent scalar functions
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use nestql_core::ast::{Expr, FromSource, NAryOp, Projection, Select};
//! use nestql_core::{compile, CompileOptions, MapBindings, Session, Value};
//!
//! let data = Value::bag(vec![
//!     Value::structure(vec![("a", Value::Int(1))]),
//!     Value::structure(vec![("a", Value::Int(2))]),
//! ]);
//! let a = || Expr::path(Expr::var("t"), &["a"]);
//! let query = Expr::select(Select {
//!     projection: Projection::Value(Box::new(a())),
//!     from: Some(FromSource::scan(Expr::var("data"), "t")),
//!     where_: Some(Box::new(Expr::nary(NAryOp::Gt, vec![a(), Expr::int(1)]))),
//!     ..Select::default()
//! });
//!
//! let compiled = compile(Arc::new(CompileOptions::default()), &query)?;
//! let session = Session::builder()
//!     .globals(MapBindings::new().with("data", data))
//!     .build();
//! let result = compiled.evaluate_forced(&session)?;
//! assert_eq!(result, Value::bag(vec![Value::Int(2)]));
//! # Ok::<(), nestql_core::EvalError>(())
//! ```

pub mod ast;
pub mod bindings;
pub mod builtins;
pub mod compiler;
pub mod env;
pub mod error;
pub mod options;
pub mod value;

// Re-export main types for convenience
pub use bindings::{
    BindingName, Bindings, BindingsExt, CaseSensitivity, DelegateBindings, EmptyBindings,
    LazyBindings, LazyBindingsBuilder, MapBindings,
};
pub use compiler::{compile, compile_with_types, CompiledQuery, Thunk, ThunkFactory};
pub use env::{CancellationToken, Environment, Session, SessionBuilder};
pub use error::{ErrorCode, ErrorKind, EvalError, EvalResult, SourceLocation};
pub use options::{CompileOptions, ProjectionIteration, TypingMode, UndefinedVariableBehavior};
pub use value::{
    sort_cmp, sql_eq, total_cmp, IntWidth, NullOrder, Seq, SortOrder, StaticType, StructValue,
    Value, ValueType,
};
