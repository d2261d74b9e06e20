//! Runtime environment: session data, lexical scopes and cancellation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bindings::{BindingName, Bindings, BindingsExt, EmptyBindings};
use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::value::Value;

/// Cooperative cancellation flag shared between the caller and an evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once cancelled.
    pub fn check(&self) -> EvalResult<()> {
        if self.is_cancelled() {
            Err(EvalError::interrupted())
        } else {
            Ok(())
        }
    }
}

/// Per-evaluation inputs supplied by the caller.
pub struct Session {
    globals: Arc<dyn Bindings<Value>>,
    parameters: Vec<Value>,
    context: BTreeMap<String, String>,
    cancellation: CancellationToken,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn globals(&self) -> &Arc<dyn Bindings<Value>> {
        &self.globals
    }

    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// Positional parameter by 1-based ordinal.
    pub fn parameter(&self, ordinal: usize) -> EvalResult<Value> {
        ordinal
            .checked_sub(1)
            .and_then(|i| self.parameters.get(i))
            .cloned()
            .ok_or_else(|| {
                EvalError::new(ErrorKind::UnboundParameter {
                    ordinal,
                    bound: self.parameters.len(),
                })
            })
    }

    /// Opaque user context pairs.
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

pub struct SessionBuilder {
    globals: Arc<dyn Bindings<Value>>,
    parameters: Vec<Value>,
    context: BTreeMap<String, String>,
    cancellation: CancellationToken,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            globals: Arc::new(EmptyBindings),
            parameters: Vec::new(),
            context: BTreeMap::new(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl SessionBuilder {
    pub fn globals<B: Bindings<Value> + 'static>(mut self, globals: B) -> Self {
        self.globals = Arc::new(globals);
        self
    }

    pub fn parameter(mut self, value: Value) -> Self {
        self.parameters.push(value);
        self
    }

    pub fn parameters(mut self, values: Vec<Value>) -> Self {
        self.parameters = values;
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn build(self) -> Arc<Session> {
        Arc::new(Session {
            globals: self.globals,
            parameters: self.parameters,
            context: self.context,
            cancellation: self.cancellation,
        })
    }
}

/// The member rows of the group currently being projected.
pub(crate) struct GroupFrame {
    pub members: Arc<Vec<Environment>>,
}

/// Scope chain for one evaluation frame.
#[derive(Clone)]
pub struct Environment {
    session: Arc<Session>,
    scope: Arc<dyn Bindings<Value>>,
    group: Option<Arc<GroupFrame>>,
}

impl Environment {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            scope: Arc::new(EmptyBindings),
            group: None,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.session.cancellation
    }

    /// A child scope whose bindings shadow this one's.
    pub fn nest(&self, bindings: Arc<dyn Bindings<Value>>) -> Environment {
        Environment {
            session: self.session.clone(),
            scope: Arc::new(bindings.delegate(self.scope.clone())),
            group: self.group.clone(),
        }
    }

    pub(crate) fn with_group(&self, members: Arc<Vec<Environment>>) -> Environment {
        Environment {
            session: self.session.clone(),
            scope: self.scope.clone(),
            group: Some(Arc::new(GroupFrame { members })),
        }
    }

    pub(crate) fn group(&self) -> Option<&Arc<GroupFrame>> {
        self.group.as_ref()
    }

    pub fn lookup_local(&self, name: &BindingName) -> EvalResult<Option<Value>> {
        self.scope.get(name)
    }

    pub fn lookup_global(&self, name: &BindingName) -> EvalResult<Option<Value>> {
        self.session.globals.get(name)
    }

    /// Resolve a variable through local scopes and the session globals.
    pub fn lookup(&self, name: &BindingName, globals_first: bool) -> EvalResult<Option<Value>> {
        if globals_first {
            match self.lookup_global(name)? {
                Some(v) => Ok(Some(v)),
                None => self.lookup_local(name),
            }
        } else {
            match self.lookup_local(name)? {
                Some(v) => Ok(Some(v)),
                None => self.lookup_global(name),
            }
        }
    }

    pub fn parameter(&self, ordinal: usize) -> EvalResult<Value> {
        self.session.parameter(ordinal)
    }
}
