//! Name resolution.
//!
//! A [`Bindings`] maps a [`BindingName`] to an optional value under the name's
//! case policy. Ambiguous matches are always an error at this layer.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::value::{StructValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    #[default]
    Insensitive,
    Sensitive,
}

/// An identifier plus the case policy it is looked up with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingName {
    pub name: String,
    #[serde(default)]
    pub case: CaseSensitivity,
}

impl BindingName {
    pub fn new(name: impl Into<String>, case: CaseSensitivity) -> Self {
        Self {
            name: name.into(),
            case,
        }
    }

    pub fn sensitive(name: impl Into<String>) -> Self {
        Self::new(name, CaseSensitivity::Sensitive)
    }

    pub fn insensitive(name: impl Into<String>) -> Self {
        Self::new(name, CaseSensitivity::Insensitive)
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self.case {
            CaseSensitivity::Sensitive => self.name == candidate,
            CaseSensitivity::Insensitive => self.name.eq_ignore_ascii_case(candidate)
                || self.name.to_lowercase() == candidate.to_lowercase(),
        }
    }
}

/// Lookup of named entries.
pub trait Bindings<T>: Send + Sync {
    fn get(&self, name: &BindingName) -> EvalResult<Option<T>>;
}

/// Pick the single entry matching `name`; two or more is [`ErrorKind::AmbiguousBinding`]
/// listing every match in source order.
pub fn resolve_unique<'a, T, I>(name: &BindingName, entries: I) -> EvalResult<Option<&'a T>>
where
    I: IntoIterator<Item = (&'a str, &'a T)>,
    T: 'a,
{
    let mut found: Option<&'a T> = None;
    let mut matches: Vec<String> = Vec::new();
    for (key, value) in entries {
        if name.matches(key) {
            if found.is_none() {
                found = Some(value);
            }
            matches.push(key.to_string());
        }
    }
    if matches.len() > 1 {
        return Err(EvalError::new(ErrorKind::AmbiguousBinding {
            name: name.name.clone(),
            matches,
        }));
    }
    Ok(found)
}

/// Binds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyBindings;

impl<T> Bindings<T> for EmptyBindings {
    fn get(&self, _name: &BindingName) -> EvalResult<Option<T>> {
        Ok(None)
    }
}

/// Eagerly bound entries kept in insertion order.
#[derive(Debug, Clone)]
pub struct MapBindings<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for MapBindings<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> MapBindings<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: T) -> Self {
        self.entries.push((name.into(), value));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: T) {
        self.entries.push((name.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T, K: Into<String>> FromIterator<(K, T)> for MapBindings<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<T: Clone + Send + Sync> Bindings<T> for MapBindings<T> {
    fn get(&self, name: &BindingName) -> EvalResult<Option<T>> {
        let found = resolve_unique(name, self.entries.iter().map(|(k, v)| (k.as_str(), v)))?;
        Ok(found.cloned())
    }
}

impl Bindings<Value> for StructValue {
    fn get(&self, name: &BindingName) -> EvalResult<Option<Value>> {
        let found = resolve_unique(name, self.fields().iter().map(|(k, v)| (k.as_str(), v)))?;
        Ok(found.cloned())
    }
}

impl<T, B: Bindings<T> + ?Sized> Bindings<T> for Arc<B> {
    fn get(&self, name: &BindingName) -> EvalResult<Option<T>> {
        (**self).get(name)
    }
}

/// Consults `primary` first and `secondary` only when `primary` has no entry.
#[derive(Debug, Clone)]
pub struct DelegateBindings<P, S> {
    primary: P,
    secondary: S,
}

impl<T, P: Bindings<T>, S: Bindings<T>> Bindings<T> for DelegateBindings<P, S> {
    fn get(&self, name: &BindingName) -> EvalResult<Option<T>> {
        match self.primary.get(name)? {
            Some(v) => Ok(Some(v)),
            None => self.secondary.get(name),
        }
    }
}

pub trait BindingsExt<T>: Bindings<T> + Sized {
    fn delegate<S: Bindings<T>>(self, secondary: S) -> DelegateBindings<Self, S> {
        DelegateBindings {
            primary: self,
            secondary,
        }
    }
}

impl<T, B: Bindings<T>> BindingsExt<T> for B {}

type Supplier<T> = Box<dyn Fn() -> EvalResult<T> + Send + Sync>;

struct LazyEntry<T> {
    supplier: Supplier<T>,
    cell: OnceCell<EvalResult<T>>,
}

impl<T: Clone> LazyEntry<T> {
    fn value(&self) -> EvalResult<T> {
        self.cell.get_or_init(|| (self.supplier)()).clone()
    }
}

/// Registers name/supplier pairs for [`LazyBindings`].
pub struct LazyBindingsBuilder<T> {
    entries: Vec<(String, LazyEntry<T>)>,
}

impl<T> Default for LazyBindingsBuilder<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> LazyBindingsBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(mut self, name: impl Into<String>, supplier: F) -> Self
    where
        F: Fn() -> EvalResult<T> + Send + Sync + 'static,
    {
        self.entries.push((
            name.into(),
            LazyEntry {
                supplier: Box::new(supplier),
                cell: OnceCell::new(),
            },
        ));
        self
    }

    pub fn build(self) -> LazyBindings<T> {
        LazyBindings {
            entries: self.entries,
        }
    }
}

/// Bindings whose values are computed on first lookup and cached, shared by
/// sensitive and insensitive lookups of the same declared name.
pub struct LazyBindings<T> {
    entries: Vec<(String, LazyEntry<T>)>,
}

impl<T: Clone + Send + Sync> Bindings<T> for LazyBindings<T> {
    fn get(&self, name: &BindingName) -> EvalResult<Option<T>> {
        let found = resolve_unique(name, self.entries.iter().map(|(k, e)| (k.as_str(), e)))?;
        found.map(LazyEntry::value).transpose()
    }
}
