//! Query blocks.
//!
//! A compiled SELECT is a pipeline over row environments:
//! FROM, LET, WHERE, GROUP BY, HAVING, ORDER BY, projection, DISTINCT, OFFSET
//! and LIMIT. LIMIT and OFFSET are checked when the query thunk runs; every
//! other stage runs when the resulting collection is iterated, and restarts on
//! each fresh iteration.

use std::cmp::Ordering;
use std::iter;
use std::sync::Arc;

use super::aggregate::{contains_aggregate, projection_has_aggregate};
use super::thunk::{Thunk, ThunkFactory};
use super::{AggContext, Compiler, GroupScope, Scope};
use crate::ast::{Expr, ExprKind, FromSource, JoinKind, Meta, NullOrder, PathStep, ProjectItem, Projection, Select, SetQuantifier, SortOrder};
use crate::bindings::{BindingName, LazyBindingsBuilder, MapBindings};
use crate::env::Environment;
use crate::error::{ErrorKind, EvalError, EvalResult};
use crate::options::ProjectionIteration;
use crate::value::{
    sort_cmp, total_cmp, try_binary_search_by, try_sort_by, Cancellable, Seq, StructValue, Value,
    ValueIter,
};

type RowIter = Box<dyn Iterator<Item = EvalResult<Environment>> + Send>;

fn failed<T: Send + 'static>(err: EvalError) -> Box<dyn Iterator<Item = EvalResult<T>> + Send> {
    Box::new(iter::once(Err(err)))
}

/// Name a FROM variable, GROUP BY key or projection item would get without an alias.
fn inferred_name(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Var { name, .. } => Some(name.clone()),
        ExprKind::Path { steps, .. } => match steps.last() {
            Some(PathStep::Field { name, .. }) => Some(name.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn positional_name(position: usize) -> String {
    format!("_{}", position)
}

/// Lexicographic total order over grouping key tuples.
fn key_cmp(a: &[Value], b: &[Value]) -> EvalResult<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        match total_cmp(x, y)? {
            Ordering::Equal => continue,
            ord => return Ok(ord),
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Values already emitted under DISTINCT, kept sorted by the total order.
#[derive(Default)]
struct SeenValues(Vec<Value>);

impl SeenValues {
    /// Records `v`, reporting whether it was new.
    fn insert(&mut self, v: &Value) -> EvalResult<bool> {
        v.force()?;
        match try_binary_search_by(&self.0, |seen| total_cmp(seen, v))? {
            Ok(_) => Ok(false),
            Err(pos) => {
                self.0.insert(pos, v.clone());
                Ok(true)
            }
        }
    }
}

struct ScanPlan {
    source: Thunk,
    unpivot: bool,
    as_name: String,
    at_name: Option<String>,
    by_name: Option<String>,
    /// Scalars become a singleton bag; otherwise they produce no rows.
    coerce_scalars: bool,
}

enum FromPlan {
    Scan(ScanPlan),
    Join {
        left: Arc<FromPlan>,
        right: Arc<FromPlan>,
        on: Option<Thunk>,
        /// Set for LEFT joins: the right-side names padded with MISSING.
        pad: Option<Vec<String>>,
    },
}

impl FromPlan {
    fn rows(self: &Arc<Self>, env: &Environment) -> RowIter {
        match &**self {
            FromPlan::Scan(scan) => scan.rows(env),
            FromPlan::Join {
                left,
                right,
                on,
                pad,
            } => {
                let right = right.clone();
                let on = on.clone();
                let pad = pad.clone();
                Box::new(left.rows(env).flat_map(move |row| -> RowIter {
                    let row = match row {
                        Ok(row) => row,
                        Err(err) => return failed(err),
                    };
                    let matches = filter_rows(right.rows(&row), on.clone());
                    match &pad {
                        Some(names) => {
                            let padding: MapBindings<Value> =
                                names.iter().map(|n| (n.clone(), Value::Missing)).collect();
                            Box::new(PadUnmatched {
                                inner: matches,
                                matched: false,
                                pad: Some(row.nest(Arc::new(padding))),
                            })
                        }
                        None => matches,
                    }
                }))
            }
        }
    }
}

impl ScanPlan {
    fn rows(&self, env: &Environment) -> RowIter {
        let source = match self.source.eval(env) {
            Ok(v) => v,
            Err(err) => return failed(err),
        };
        let items = self.items(&source);
        let token = env.cancellation().clone();
        let env = env.clone();
        let names = (self.as_name.clone(), self.at_name.clone(), self.by_name.clone());

        Box::new(Cancellable::new(
            items.map(move |item| -> EvalResult<Environment> {
                let (at, value) = item?;
                let mut bindings = MapBindings::new();
                if let Some(by) = &names.2 {
                    let address = value
                        .as_addressed()
                        .map(|a| a.address().clone())
                        .unwrap_or(Value::Missing);
                    bindings.insert(by.clone(), address);
                }
                if let Some(at_name) = &names.1 {
                    bindings.insert(at_name.clone(), at);
                }
                bindings.insert(names.0.clone(), value);
                Ok(env.nest(Arc::new(bindings)))
            }),
            token,
        ))
    }

    /// `(AT value, element)` pairs of the source.
    fn items(&self, source: &Value) -> Box<dyn Iterator<Item = EvalResult<(Value, Value)>> + Send> {
        if self.unpivot {
            let pairs: Vec<(Value, Value)> = match source.content() {
                Value::Struct(s) => s
                    .fields()
                    .iter()
                    .map(|(name, v)| (Value::string(name.clone()), v.clone()))
                    .collect(),
                Value::Missing => Vec::new(),
                other => vec![(Value::string("_1"), other.clone())],
            };
            return Box::new(pairs.into_iter().map(Ok));
        }
        match source.content() {
            Value::List(seq) | Value::Sexp(seq) => Box::new(
                seq.iter()
                    .enumerate()
                    .map(|(i, v)| v.map(|v| (Value::Int(i as i64), v))),
            ),
            Value::Bag(seq) => Box::new(seq.iter().map(|v| v.map(|v| (Value::Missing, v)))),
            _ if self.coerce_scalars => Box::new(iter::once(Ok((Value::Missing, source.clone())))),
            _ => Box::new(iter::empty()),
        }
    }
}

/// Keep rows whose predicate evaluates to TRUE.
fn filter_rows(rows: RowIter, predicate: Option<Thunk>) -> RowIter {
    let predicate = match predicate {
        Some(p) => p,
        None => return rows,
    };
    Box::new(rows.filter_map(move |row| match row {
        Ok(row) => match predicate.eval(&row) {
            Ok(v) if v.as_bool() == Some(true) => Some(Ok(row)),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        },
        Err(err) => Some(Err(err)),
    }))
}

/// LEFT JOIN: yields `pad` once if no right row matched.
struct PadUnmatched {
    inner: RowIter,
    matched: bool,
    pad: Option<Environment>,
}

impl Iterator for PadUnmatched {
    type Item = EvalResult<Environment>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(Ok(row)) => {
                self.matched = true;
                Some(Ok(row))
            }
            Some(Err(err)) => {
                self.pad = None;
                Some(Err(err))
            }
            None if self.matched => None,
            None => self.pad.take().map(Ok),
        }
    }
}

/// OFFSET/LIMIT over successful items; errors pass through uncounted.
struct Page<I> {
    inner: I,
    skip: usize,
    remaining: Option<usize>,
}

impl<I, T> Iterator for Page<I>
where
    I: Iterator<Item = EvalResult<T>>,
{
    type Item = EvalResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            match self.inner.next()? {
                Ok(_) if self.skip > 0 => self.skip -= 1,
                Ok(item) => {
                    if let Some(n) = self.remaining.as_mut() {
                        *n -= 1;
                    }
                    return Some(Ok(item));
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Clause {
    Limit,
    Offset,
}

impl Clause {
    fn name(self) -> &'static str {
        match self {
            Clause::Limit => "LIMIT",
            Clause::Offset => "OFFSET",
        }
    }

    fn negative(self, value: i64) -> ErrorKind {
        match self {
            Clause::Limit => ErrorKind::NegativeLimit { value },
            Clause::Offset => ErrorKind::NegativeOffset { value },
        }
    }
}

/// Evaluate a LIMIT/OFFSET operand; large counts clamp to `usize::MAX`.
fn eval_count(clause: Clause, thunk: Option<&Thunk>, env: &Environment) -> EvalResult<Option<usize>> {
    let thunk = match thunk {
        Some(t) => t,
        None => return Ok(None),
    };
    let value = thunk.eval(env)?;
    match value.content() {
        Value::Int(n) if *n < 0 => Err(EvalError::new(clause.negative(*n)).at(thunk.location())),
        Value::Int(n) => Ok(Some(usize::try_from(*n).unwrap_or(usize::MAX))),
        other => Err(EvalError::new(ErrorKind::NonIntegerLimitOrOffsetValue {
            clause: clause.name(),
            found: other.value_type(),
        })
        .at(thunk.location())),
    }
}

struct GroupPlan {
    /// Key thunk and the name the key is visible under.
    keys: Vec<(Thunk, String)>,
    group_as: Option<String>,
    /// FROM/LET variables captured into each GROUP AS member.
    member_names: Vec<String>,
}

impl GroupPlan {
    fn member_struct(&self, row: &Environment) -> EvalResult<Value> {
        let mut fields = Vec::with_capacity(self.member_names.len());
        for name in &self.member_names {
            if let Some(v) = row.lookup_local(&BindingName::sensitive(name.clone()))? {
                fields.push((name.clone(), v));
            }
        }
        Ok(Value::Struct(StructValue::new(fields)))
    }

    /// Partition rows by key; groups keep first-seen order.
    fn apply(&self, rows: RowIter, outer: &Environment) -> EvalResult<Vec<Environment>> {
        // Sorted (key, group position) pairs
        let mut index: Vec<(Vec<Value>, usize)> = Vec::new();
        let mut groups: Vec<(Vec<Value>, Vec<Environment>)> = Vec::new();
        for row in rows {
            let row = row?;
            let key = self
                .keys
                .iter()
                .map(|(thunk, _)| {
                    let v = thunk.eval(&row)?;
                    v.force()?;
                    Ok(v)
                })
                .collect::<EvalResult<Vec<_>>>()?;
            match try_binary_search_by(&index, |(seen, _)| key_cmp(seen, &key))? {
                Ok(found) => groups[index[found].1].1.push(row),
                Err(pos) => {
                    index.insert(pos, (key.clone(), groups.len()));
                    groups.push((key, vec![row]));
                }
            }
        }
        if groups.is_empty() && self.keys.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }
        tracing::trace!(groups = groups.len(), "grouped rows");

        groups
            .into_iter()
            .map(|(key, members)| {
                let mut bindings = MapBindings::new();
                for ((_, name), value) in self.keys.iter().zip(key) {
                    bindings.insert(name.clone(), value);
                }
                if let Some(name) = &self.group_as {
                    let captured = members
                        .iter()
                        .map(|m| self.member_struct(m))
                        .collect::<EvalResult<Vec<_>>>()?;
                    bindings.insert(name.clone(), Value::bag(captured));
                }
                Ok(outer.nest(Arc::new(bindings)).with_group(Arc::new(members)))
            })
            .collect()
    }
}

struct SortKey {
    thunk: Thunk,
    order: SortOrder,
    nulls: NullOrder,
}

enum ItemPlan {
    Expr {
        thunk: Thunk,
        name: Option<String>,
        position: usize,
    },
    All {
        thunk: Thunk,
        position: usize,
    },
}

enum ProjectionPlan {
    /// Merge struct-valued variables; bind others under their name.
    Star(Vec<String>),
    Items(Vec<ItemPlan>),
    Value(Thunk),
    Pivot { value: Thunk, key: Thunk },
}

struct SelectPlan {
    from: Option<Arc<FromPlan>>,
    lets: Vec<(String, Thunk)>,
    where_: Option<Thunk>,
    group: Option<GroupPlan>,
    having: Option<Thunk>,
    order_by: Vec<SortKey>,
    projection: ProjectionPlan,
    distinct: bool,
    filter_missing: bool,
}

fn bind_let(row: &Environment, name: &str, thunk: &Thunk) -> Environment {
    let prev = row.clone();
    let thunk = thunk.clone();
    let lazy = LazyBindingsBuilder::new()
        .add(name, move || thunk.eval(&prev))
        .build();
    row.nest(Arc::new(lazy))
}

impl SelectPlan {
    /// Rows ready for projection: after grouping, HAVING and ORDER BY.
    fn rows(&self, env: &Environment) -> EvalResult<RowIter> {
        let mut rows: RowIter = match &self.from {
            Some(from) => from.rows(env),
            None => Box::new(iter::once(Ok(env.clone()))),
        };
        for (name, thunk) in &self.lets {
            let (name, thunk) = (name.clone(), thunk.clone());
            rows = Box::new(rows.map(move |row| row.map(|row| bind_let(&row, &name, &thunk))));
        }
        rows = filter_rows(rows, self.where_.clone());

        if let Some(group) = &self.group {
            let groups = group.apply(rows, env)?;
            rows = Box::new(groups.into_iter().map(Ok));
        }
        rows = filter_rows(rows, self.having.clone());

        if !self.order_by.is_empty() {
            let sorted = self.sort(rows)?;
            rows = Box::new(sorted.into_iter().map(Ok));
        }
        Ok(rows)
    }

    fn sort(&self, rows: RowIter) -> EvalResult<Vec<Environment>> {
        let mut keyed = rows
            .map(|row| {
                let row = row?;
                let keys = self
                    .order_by
                    .iter()
                    .map(|k| k.thunk.eval(&row))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok((keys, row))
            })
            .collect::<EvalResult<Vec<_>>>()?;
        try_sort_by(
            &mut keyed,
            |(keys, _)| keys.iter().try_for_each(Value::force),
            |(a, _), (b, _)| {
                for ((x, y), key) in a.iter().zip(b.iter()).zip(self.order_by.iter()) {
                    match sort_cmp(x, y, key.order, key.nulls)? {
                        Ordering::Equal => continue,
                        ord => return Ok(ord),
                    }
                }
                Ok(Ordering::Equal)
            },
        )?;
        tracing::trace!(rows = keyed.len(), "sorted rows");
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    fn project(&self, row: &Environment) -> EvalResult<Value> {
        match &self.projection {
            ProjectionPlan::Value(thunk) => thunk.eval(row),
            ProjectionPlan::Star(names) => {
                let mut fields = Vec::new();
                for name in names {
                    match row.lookup_local(&BindingName::sensitive(name.clone()))? {
                        Some(v) if v.is_missing() => {}
                        Some(v) => match v.as_struct() {
                            Some(s) => fields.extend(s.fields().iter().cloned()),
                            None => fields.push((name.clone(), v)),
                        },
                        None => {}
                    }
                }
                Ok(Value::Struct(StructValue::new(fields)))
            }
            ProjectionPlan::Items(items) => {
                let mut fields = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        ItemPlan::Expr {
                            thunk,
                            name,
                            position,
                        } => {
                            let v = thunk.eval(row)?;
                            if self.filter_missing && v.is_missing() {
                                continue;
                            }
                            let name = name
                                .clone()
                                .or_else(|| v.as_named().and_then(|n| n.name().as_text().map(str::to_string)))
                                .unwrap_or_else(|| positional_name(*position));
                            fields.push((name, v));
                        }
                        ItemPlan::All { thunk, position } => {
                            let v = thunk.eval(row)?;
                            match v.as_struct() {
                                Some(s) => fields.extend(s.fields().iter().cloned()),
                                None if v.is_missing() => {}
                                None => fields.push((positional_name(*position), v)),
                            }
                        }
                    }
                }
                Ok(Value::Struct(StructValue::new(fields)))
            }
            ProjectionPlan::Pivot { .. } => Err(EvalError::type_mismatch("PIVOT", "a row projection", &Value::Missing)),
        }
    }

    /// Projected values, de-duplicated under DISTINCT.
    fn values(self: &Arc<Self>, env: &Environment) -> EvalResult<ValueIter> {
        let plan = self.clone();
        let projected = self.rows(env)?.map(move |row| plan.project(&row?));
        if !self.distinct {
            return Ok(Box::new(projected));
        }
        let mut seen = SeenValues::default();
        Ok(Box::new(projected.filter_map(move |item| match item {
            Ok(v) => match seen.insert(&v) {
                Ok(true) => Some(Ok(v)),
                Ok(false) => None,
                Err(err) => Some(Err(err)),
            },
            Err(err) => Some(Err(err)),
        })))
    }

    fn pivot(&self, env: &Environment, offset: usize, limit: Option<usize>) -> EvalResult<Value> {
        let (value, key) = match &self.projection {
            ProjectionPlan::Pivot { value, key } => (value, key),
            _ => return Err(EvalError::type_mismatch("PIVOT", "a pivot projection", &Value::Missing)),
        };
        let rows = Page {
            inner: Cancellable::new(self.rows(env)?, env.cancellation().clone()),
            skip: offset,
            remaining: limit,
        };
        let mut fields = Vec::new();
        for row in rows {
            let row = row?;
            let k = key.eval(&row)?;
            let v = value.eval(&row)?;
            if let Some(name) = k.as_text() {
                if !v.is_missing() {
                    fields.push((name.to_string(), v));
                }
            }
        }
        Ok(Value::Struct(StructValue::new(fields)))
    }
}

impl<F: ThunkFactory> Compiler<F> {
    /// Compile a FROM item, returning its plan and the names it binds in order.
    fn compile_from(
        &self,
        source: &FromSource,
        scope: &Scope,
        position: &mut usize,
        coerce_scalars: bool,
    ) -> EvalResult<(Arc<FromPlan>, Vec<String>)> {
        match source {
            FromSource::Scan {
                expr,
                as_alias,
                at_alias,
                by_alias,
            }
            | FromSource::Unpivot {
                expr,
                as_alias,
                at_alias,
                by_alias,
            } => {
                *position += 1;
                let source_thunk = self.compile_expr(expr, &scope.from_source())?;
                let as_name = as_alias
                    .clone()
                    .or_else(|| inferred_name(expr))
                    .unwrap_or_else(|| positional_name(*position));
                let mut names = vec![as_name.clone()];
                names.extend(at_alias.iter().cloned());
                names.extend(by_alias.iter().cloned());
                let plan = ScanPlan {
                    source: source_thunk,
                    unpivot: matches!(source, FromSource::Unpivot { .. }),
                    as_name,
                    at_name: at_alias.clone(),
                    by_name: by_alias.clone(),
                    coerce_scalars,
                };
                Ok((Arc::new(FromPlan::Scan(plan)), names))
            }
            FromSource::Join {
                kind,
                left,
                right,
                on,
            } => {
                let is_left = match kind {
                    JoinKind::Inner => false,
                    JoinKind::Left => true,
                    JoinKind::Right | JoinKind::Full => {
                        return Err(EvalError::new(ErrorKind::UnsupportedJoinKind {
                            kind: format!("{:?}", kind).to_uppercase(),
                        }))
                    }
                };
                let (left_plan, mut names) = self.compile_from(left, scope, position, true)?;
                let right_scope = scope.with_locals(names.clone());
                let (right_plan, right_names) = self.compile_from(right, &right_scope, position, !is_left)?;
                names.extend(right_names.iter().cloned());
                let on = match on {
                    Some(on) => Some(self.compile_expr(on, &scope.with_locals(names.clone()).expression())?),
                    None => None,
                };
                let plan = FromPlan::Join {
                    left: left_plan,
                    right: right_plan,
                    on,
                    pad: is_left.then_some(right_names),
                };
                Ok((Arc::new(plan), names))
            }
        }
    }

    fn compile_projection(&self, projection: &Projection, scope: &Scope, star_names: Vec<String>) -> EvalResult<ProjectionPlan> {
        Ok(match projection {
            Projection::Star => ProjectionPlan::Star(star_names),
            Projection::Value(expr) => ProjectionPlan::Value(self.compile_expr(expr, scope)?),
            Projection::Pivot { value, key } => ProjectionPlan::Pivot {
                value: self.compile_expr(value, scope)?,
                key: self.compile_expr(key, scope)?,
            },
            Projection::Items(items) => ProjectionPlan::Items(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        Ok(match item {
                            ProjectItem::Expr { expr, alias } => ItemPlan::Expr {
                                thunk: self.compile_expr(expr, scope)?,
                                name: alias.clone().or_else(|| inferred_name(expr)),
                                position: i + 1,
                            },
                            ProjectItem::All(expr) => ItemPlan::All {
                                thunk: self.compile_expr(expr, scope)?,
                                position: i + 1,
                            },
                        })
                    })
                    .collect::<EvalResult<Vec<_>>>()?,
            ),
        })
    }

    pub(super) fn compile_select(&self, meta: &Meta, select: &Select, scope: &Scope) -> EvalResult<Thunk> {
        let outer = scope.expression().aggregates(AggContext::Forbidden);

        let mut position = 0;
        let (from, from_names) = match &select.from {
            Some(source) => {
                let (plan, names) = self.compile_from(source, &outer, &mut position, true)?;
                (Some(plan), names)
            }
            None => (None, Vec::new()),
        };

        let mut rows_scope = outer.with_locals(from_names.clone());
        let mut lets = Vec::with_capacity(select.lets.len());
        for binding in &select.lets {
            lets.push((binding.name.clone(), self.compile_expr(&binding.expr, &rows_scope)?));
            rows_scope = rows_scope.with_locals([binding.name.clone()]);
        }
        let where_ = match &select.where_ {
            Some(e) => Some(self.compile_expr(e, &rows_scope)?),
            None => None,
        };

        let has_aggregates = projection_has_aggregate(&select.projection)
            || select.having.as_deref().map_or(false, contains_aggregate)
            || select.order_by.iter().any(|s| contains_aggregate(&s.expr));

        let (group, post_scope, star_names) = if select.group_by.is_some() || has_aggregates {
            let (keys, group_as) = match &select.group_by {
                Some(group_by) => (group_by.keys.as_slice(), group_by.group_as.clone()),
                None => (&[][..], None),
            };
            let keys = keys
                .iter()
                .enumerate()
                .map(|(i, key)| {
                    let name = key
                        .alias
                        .clone()
                        .or_else(|| inferred_name(&key.expr))
                        .unwrap_or_else(|| positional_name(i + 1));
                    Ok((self.compile_expr(&key.expr, &rows_scope)?, name))
                })
                .collect::<EvalResult<Vec<_>>>()?;

            let mut member_names = from_names.clone();
            member_names.extend(select.lets.iter().map(|l| l.name.clone()));
            let mut visible: Vec<String> = keys.iter().map(|(_, name)| name.clone()).collect();
            visible.extend(group_as.iter().cloned());

            let mut post = outer.with_locals(visible.clone());
            post.group = Some(Arc::new(GroupScope {
                hidden: member_names.clone(),
                rows: rows_scope.clone(),
            }));
            post.aggregates = AggContext::Allowed;

            let plan = GroupPlan {
                keys,
                group_as,
                member_names,
            };
            (Some(plan), post, visible)
        } else {
            (None, rows_scope.clone(), from_names)
        };

        let having = match &select.having {
            Some(e) => Some(self.compile_expr(e, &post_scope)?),
            None => None,
        };
        let order_by = select
            .order_by
            .iter()
            .map(|key| {
                Ok(SortKey {
                    thunk: self.compile_expr(&key.expr, &post_scope)?,
                    order: key.order,
                    nulls: key.nulls.unwrap_or(match key.order {
                        SortOrder::Asc => NullOrder::First,
                        SortOrder::Desc => NullOrder::Last,
                    }),
                })
            })
            .collect::<EvalResult<Vec<_>>>()?;
        let projection = self.compile_projection(&select.projection, &post_scope, star_names)?;

        let limit = match &select.limit {
            Some(e) => Some(self.compile_expr(e, &outer)?),
            None => None,
        };
        let offset = match &select.offset {
            Some(e) => Some(self.compile_expr(e, &outer)?),
            None => None,
        };

        let is_pivot = matches!(projection, ProjectionPlan::Pivot { .. });
        let ordered = !order_by.is_empty();
        let plan = Arc::new(SelectPlan {
            from,
            lets,
            where_,
            group,
            having,
            order_by,
            projection,
            distinct: select.quantifier == SetQuantifier::Distinct,
            filter_missing: self.options.projection_iteration == ProjectionIteration::FilterMissing,
        });

        Ok(self.factory.thunk_env(meta, move |env| {
            let offset = eval_count(Clause::Offset, offset.as_ref(), env)?.unwrap_or(0);
            let limit = eval_count(Clause::Limit, limit.as_ref(), env)?;
            if is_pivot {
                return plan.pivot(env, offset, limit);
            }

            let plan = plan.clone();
            let env = env.clone();
            let seq = Seq::deferred(move || -> ValueIter {
                match plan.values(&env) {
                    Ok(values) => Box::new(Cancellable::new(
                        Page {
                            inner: values,
                            skip: offset,
                            remaining: limit,
                        },
                        env.cancellation().clone(),
                    )),
                    Err(err) => failed(err),
                }
            });
            Ok(if ordered {
                Value::List(seq)
            } else {
                Value::Bag(seq)
            })
        }))
    }
}
