//! Backing sequences for LIST, SEXP and BAG values.
//!
//! A sequence is either already materialized or produced on demand by a
//! restartable producer. Producers run when the sequence is iterated, which is
//! where binding suppliers execute and cancellation is observed.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::Value;
use crate::env::CancellationToken;
use crate::error::{EvalError, EvalResult};

/// Fallible iterator over produced values.
pub type ValueIter = Box<dyn Iterator<Item = EvalResult<Value>> + Send>;

type Producer = Arc<dyn Fn() -> ValueIter + Send + Sync>;

#[derive(Clone)]
pub enum Seq {
    Values(Arc<Vec<Value>>),
    Deferred {
        producer: Producer,
        forced: Arc<OnceCell<EvalResult<Arc<Vec<Value>>>>>,
    },
}

impl Seq {
    pub fn from_vec(values: Vec<Value>) -> Self {
        Seq::Values(Arc::new(values))
    }

    pub fn empty() -> Self {
        Seq::from_vec(Vec::new())
    }

    /// A sequence whose elements are produced by `producer` on each iteration.
    pub fn deferred<F>(producer: F) -> Self
    where
        F: Fn() -> ValueIter + Send + Sync + 'static,
    {
        Seq::Deferred {
            producer: Arc::new(producer),
            forced: Arc::new(OnceCell::new()),
        }
    }

    /// Iterate the elements. Deferred sequences restart their producer unless
    /// they have already been forced.
    pub fn iter(&self) -> ValueIter {
        match self {
            Seq::Values(values) => Box::new(SharedIter::new(values.clone())),
            Seq::Deferred { producer, forced } => match forced.get() {
                Some(Ok(values)) => Box::new(SharedIter::new(values.clone())),
                Some(Err(err)) => Box::new(std::iter::once(Err(err.clone()))),
                None => producer(),
            },
        }
    }

    /// Materialize the elements once and cache them.
    pub fn force(&self) -> EvalResult<Arc<Vec<Value>>> {
        match self {
            Seq::Values(values) => Ok(values.clone()),
            Seq::Deferred { producer, forced } => forced
                .get_or_init(|| producer().collect::<EvalResult<Vec<_>>>().map(Arc::new))
                .clone(),
        }
    }

    pub fn is_materialized(&self) -> bool {
        match self {
            Seq::Values(_) => true,
            Seq::Deferred { forced, .. } => forced.get().is_some(),
        }
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seq::Values(values) => f.debug_list().entries(values.iter()).finish(),
            Seq::Deferred { forced, .. } => match forced.get() {
                Some(Ok(values)) => f.debug_list().entries(values.iter()).finish(),
                Some(Err(err)) => write!(f, "<failed: {:?}>", err),
                None => f.write_str("<deferred>"),
            },
        }
    }
}

struct SharedIter {
    values: Arc<Vec<Value>>,
    pos: usize,
}

impl SharedIter {
    fn new(values: Arc<Vec<Value>>) -> Self {
        Self { values, pos: 0 }
    }
}

impl Iterator for SharedIter {
    type Item = EvalResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.values.get(self.pos)?.clone();
        self.pos += 1;
        Some(Ok(value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.values.len().saturating_sub(self.pos);
        (left, Some(left))
    }
}

/// Checks a cancellation token before every element it yields.
/// After reporting the interruption it yields nothing more.
pub struct Cancellable<I> {
    inner: I,
    token: CancellationToken,
    done: bool,
}

impl<I> Cancellable<I> {
    pub fn new(inner: I, token: CancellationToken) -> Self {
        Self {
            inner,
            token,
            done: false,
        }
    }
}

impl<I, T> Iterator for Cancellable<I>
where
    I: Iterator<Item = EvalResult<T>>,
{
    type Item = EvalResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.token.is_cancelled() {
            self.done = true;
            return Some(Err(EvalError::interrupted()));
        }
        let item = self.inner.next();
        if matches!(item, Some(Err(_)) | None) {
            self.done = true;
        }
        item
    }
}
