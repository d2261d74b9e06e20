//! Compiler from query trees to reusable thunks.
//!
//! The typing mode picks a [`ThunkFactory`] once per compilation; every node is
//! compiled exactly once into a closure carrying that factory's failure policy.
//! A compiled query can be evaluated many times and from many threads.

mod aggregate;
mod arith;
mod expr;
mod helpers;
mod query;
mod thunk;

use std::sync::Arc;

pub use thunk::{
    LogicalOp, PermissiveThunkFactory, StrictThunkFactory, Thunk, ThunkEnvValue,
    ThunkEnvValueList, ThunkFactory,
};

use crate::ast::{Expr, ExprKind};
use crate::bindings::{BindingName, Bindings, EmptyBindings};
use crate::env::{Environment, Session};
use crate::error::EvalResult;
use crate::options::{CompileOptions, TypingMode};
use crate::value::{IntWidth, StaticType, Value};

/// A compiled query tree.
#[derive(Clone)]
pub struct CompiledQuery {
    thunk: Thunk,
    options: Arc<CompileOptions>,
}

impl CompiledQuery {
    /// Evaluate against a session. Collections in the result may be deferred;
    /// iterate or [`Value::force`] them to run the remaining pipeline.
    pub fn evaluate(&self, session: &Arc<Session>) -> EvalResult<Value> {
        session.cancellation().check()?;
        self.thunk.eval(&Environment::new(session.clone()))
    }

    /// Evaluate and materialize every nested collection.
    pub fn evaluate_forced(&self, session: &Arc<Session>) -> EvalResult<Value> {
        let value = self.evaluate(session)?;
        value.force()?;
        Ok(value)
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }
}

/// Compile `expr` with no statically known global types.
pub fn compile(options: Arc<CompileOptions>, expr: &Expr) -> EvalResult<CompiledQuery> {
    compile_with_types(options, Arc::new(EmptyBindings), expr)
}

/// Compile `expr`, using `global_types` to infer integer widths of global variables.
pub fn compile_with_types(
    options: Arc<CompileOptions>,
    global_types: Arc<dyn Bindings<StaticType>>,
    expr: &Expr,
) -> EvalResult<CompiledQuery> {
    tracing::debug!(typing_mode = ?options.typing_mode, "compiling query");
    let thunk = match options.typing_mode {
        TypingMode::Legacy => {
            Compiler::new(StrictThunkFactory, options.clone(), global_types).compile_root(expr)?
        }
        TypingMode::Permissive => {
            Compiler::new(PermissiveThunkFactory, options.clone(), global_types)
                .compile_root(expr)?
        }
    };
    tracing::debug!("query compiled");
    Ok(CompiledQuery { thunk, options })
}

/// Where aggregate calls may appear in the expression being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AggContext {
    #[default]
    Forbidden,
    Allowed,
    InsideAggregate,
}

/// Post-grouping visibility: FROM/LET variables are hidden unless regrouped.
pub(crate) struct GroupScope {
    hidden: Vec<String>,
    /// Scope aggregate arguments are compiled in, one member row at a time.
    rows: Scope,
}

/// Compile-time view of the names a node can see.
#[derive(Clone, Default)]
pub(crate) struct Scope {
    locals: Vec<String>,
    in_from_source: bool,
    aggregates: AggContext,
    group: Option<Arc<GroupScope>>,
}

impl Scope {
    fn with_locals<I, S>(&self, names: I) -> Scope
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut scope = self.clone();
        scope.locals.extend(names.into_iter().map(Into::into));
        scope
    }

    fn binds(&self, name: &BindingName) -> bool {
        self.locals.iter().any(|local| name.matches(local))
    }

    fn hidden_by_group(&self, name: &BindingName) -> bool {
        match &self.group {
            Some(group) => !self.binds(name) && group.hidden.iter().any(|h| name.matches(h)),
            None => false,
        }
    }

    fn from_source(&self) -> Scope {
        Scope {
            in_from_source: true,
            ..self.clone()
        }
    }

    fn expression(&self) -> Scope {
        Scope {
            in_from_source: false,
            ..self.clone()
        }
    }

    fn aggregates(&self, aggregates: AggContext) -> Scope {
        Scope {
            aggregates,
            ..self.clone()
        }
    }
}

pub(crate) struct Compiler<F: ThunkFactory> {
    factory: F,
    options: Arc<CompileOptions>,
    global_types: Arc<dyn Bindings<StaticType>>,
}

impl<F: ThunkFactory> Compiler<F> {
    fn new(
        factory: F,
        options: Arc<CompileOptions>,
        global_types: Arc<dyn Bindings<StaticType>>,
    ) -> Self {
        Self {
            factory,
            options,
            global_types,
        }
    }

    fn compile_root(&self, expr: &Expr) -> EvalResult<Thunk> {
        self.compile_expr(expr, &Scope::default())
    }

    /// Statically known integer width of an operand, if any.
    fn int_width(&self, expr: &Expr, scope: &Scope) -> Option<IntWidth> {
        if let Some(ty) = &expr.meta.static_type {
            return ty.int_width();
        }
        match &expr.kind {
            ExprKind::Var { name, case, .. } => {
                let name = BindingName::new(name.clone(), *case);
                if scope.binds(&name) {
                    return None;
                }
                self.global_types
                    .get(&name)
                    .ok()
                    .flatten()
                    .and_then(|ty| ty.int_width())
            }
            _ => None,
        }
    }

    /// Widest width over all operands, known only when every operand has one.
    fn operands_width(&self, operands: &[Expr], scope: &Scope) -> Option<IntWidth> {
        operands
            .iter()
            .map(|e| self.int_width(e, scope))
            .collect::<Option<Vec<_>>>()
            .and_then(|widths| widths.into_iter().max())
    }
}
