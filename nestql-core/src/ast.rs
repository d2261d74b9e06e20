//! Query tree consumed by the compiler.
//!
//! Trees are produced by an external parser (or deserialized from JSON) and may
//! carry source locations and statically inferred types in [`Meta`].

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::bindings::CaseSensitivity;
use crate::error::SourceLocation;
use crate::value::{StaticType, ValueType};

pub use crate::value::{NullOrder, SortOrder};

/// Per-node metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_type: Option<StaticType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    Lit(Literal),
    Var {
        name: String,
        #[serde(default)]
        case: CaseSensitivity,
        #[serde(default)]
        qualifier: VarQualifier,
    },
    /// 1-based positional parameter.
    Param(usize),
    Path {
        root: Box<Expr>,
        steps: Vec<PathStep>,
    },
    NAry {
        op: NAryOp,
        args: Vec<Expr>,
    },
    IsType {
        operand: Box<Expr>,
        ty: ValueType,
        #[serde(default)]
        negated: bool,
    },
    Case {
        #[serde(default)]
        operand: Option<Box<Expr>>,
        branches: Vec<CaseBranch>,
        #[serde(default)]
        default: Option<Box<Expr>>,
    },
    Cast {
        operand: Box<Expr>,
        to: CastTarget,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Aggregate {
        func: AggregateFunc,
        #[serde(default)]
        quantifier: SetQuantifier,
        /// `None` for `COUNT(*)`.
        #[serde(default)]
        arg: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Sexp(Vec<Expr>),
    Bag(Vec<Expr>),
    Struct(Vec<StructField>),
    Select(Box<Select>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Missing,
    Bool(bool),
    Int(#[serde(with = "bigint_text")] BigInt),
    Float(f64),
    /// Decimal in its textual form.
    Decimal(String),
    String(String),
    Symbol(String),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeWithZone {
        time: NaiveTime,
        #[serde(default)]
        offset_minutes: Option<i32>,
    },
    Timestamp(DateTime<FixedOffset>),
    Blob(Vec<u8>),
    Clob(Vec<u8>),
}

/// `@x` resolves local scopes before globals even inside a FROM source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarQualifier {
    #[default]
    Unqualified,
    LocalsFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStep {
    Field {
        name: String,
        #[serde(default)]
        case: CaseSensitivity,
    },
    Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NAryOp {
    Not,
    Neg,
    Pos,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    Between,
    NotBetween,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    And,
    Or,
}

impl NAryOp {
    /// Accepted operand counts as `(min, max)`; `None` is unbounded.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            NAryOp::Not | NAryOp::Neg | NAryOp::Pos => (1, Some(1)),
            NAryOp::Eq
            | NAryOp::Ne
            | NAryOp::Lt
            | NAryOp::Le
            | NAryOp::Gt
            | NAryOp::Ge
            | NAryOp::In
            | NAryOp::NotIn => (2, Some(2)),
            NAryOp::Like | NAryOp::NotLike => (2, Some(3)),
            NAryOp::Between | NAryOp::NotBetween => (3, Some(3)),
            NAryOp::Add
            | NAryOp::Sub
            | NAryOp::Mul
            | NAryOp::Div
            | NAryOp::Mod
            | NAryOp::Concat
            | NAryOp::And
            | NAryOp::Or => (2, None),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            NAryOp::Not => "NOT",
            NAryOp::Neg => "-",
            NAryOp::Pos => "+",
            NAryOp::Eq => "=",
            NAryOp::Ne => "<>",
            NAryOp::Lt => "<",
            NAryOp::Le => "<=",
            NAryOp::Gt => ">",
            NAryOp::Ge => ">=",
            NAryOp::In => "IN",
            NAryOp::NotIn => "NOT IN",
            NAryOp::Like => "LIKE",
            NAryOp::NotLike => "NOT LIKE",
            NAryOp::Between => "BETWEEN",
            NAryOp::NotBetween => "NOT BETWEEN",
            NAryOp::Add => "+",
            NAryOp::Sub => "-",
            NAryOp::Mul => "*",
            NAryOp::Div => "/",
            NAryOp::Mod => "%",
            NAryOp::Concat => "||",
            NAryOp::And => "AND",
            NAryOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    pub when: Expr,
    pub then: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastTarget {
    Bool,
    Int,
    Float,
    Decimal,
    String,
    Symbol,
}

impl CastTarget {
    pub fn value_type(self) -> ValueType {
        match self {
            CastTarget::Bool => ValueType::Bool,
            CastTarget::Int => ValueType::Int,
            CastTarget::Float => ValueType::Float,
            CastTarget::Decimal => ValueType::Decimal,
            CastTarget::String => ValueType::String,
            CastTarget::Symbol => ValueType::Symbol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetQuantifier {
    #[default]
    All,
    Distinct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: Expr,
    pub value: Expr,
}

/// A SELECT / SELECT VALUE / PIVOT query block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Select {
    pub quantifier: SetQuantifier,
    pub projection: Projection,
    pub from: Option<FromSource>,
    pub lets: Vec<LetBinding>,
    #[serde(rename = "where")]
    pub where_: Option<Box<Expr>>,
    pub group_by: Option<GroupBy>,
    pub having: Option<Box<Expr>>,
    pub order_by: Vec<SortSpec>,
    pub limit: Option<Box<Expr>>,
    pub offset: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    Star,
    Items(Vec<ProjectItem>),
    Value(Box<Expr>),
    Pivot {
        value: Box<Expr>,
        key: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectItem {
    Expr {
        expr: Expr,
        #[serde(default)]
        alias: Option<String>,
    },
    /// `expr.*`
    All(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FromSource {
    Scan {
        expr: Expr,
        #[serde(default)]
        as_alias: Option<String>,
        #[serde(default)]
        at_alias: Option<String>,
        #[serde(default)]
        by_alias: Option<String>,
    },
    Unpivot {
        expr: Expr,
        #[serde(default)]
        as_alias: Option<String>,
        #[serde(default)]
        at_alias: Option<String>,
        #[serde(default)]
        by_alias: Option<String>,
    },
    Join {
        kind: JoinKind,
        left: Box<FromSource>,
        right: Box<FromSource>,
        #[serde(default)]
        on: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetBinding {
    pub expr: Expr,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub keys: Vec<GroupKey>,
    #[serde(default)]
    pub group_as: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupKey {
    pub expr: Expr,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub expr: Expr,
    #[serde(default)]
    pub order: SortOrder,
    /// Defaults to NULLS FIRST for ASC and NULLS LAST for DESC.
    #[serde(default)]
    pub nulls: Option<NullOrder>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            meta: Meta::default(),
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.meta.location = Some(SourceLocation::new(line, column));
        self
    }

    pub fn typed(mut self, static_type: StaticType) -> Self {
        self.meta.static_type = Some(static_type);
        self
    }

    pub fn lit(literal: Literal) -> Self {
        Self::new(ExprKind::Lit(literal))
    }

    pub fn int(n: i64) -> Self {
        Self::lit(Literal::Int(BigInt::from(n)))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::lit(Literal::String(s.into()))
    }

    pub fn null() -> Self {
        Self::lit(Literal::Null)
    }

    pub fn missing() -> Self {
        Self::lit(Literal::Missing)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Var {
            name: name.into(),
            case: CaseSensitivity::Insensitive,
            qualifier: VarQualifier::Unqualified,
        })
    }

    pub fn nary(op: NAryOp, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::NAry { op, args })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            name: name.into(),
            args,
        })
    }

    /// `root.a.b` with case-insensitive field steps.
    pub fn path(root: Expr, fields: &[&str]) -> Self {
        Self::new(ExprKind::Path {
            root: Box::new(root),
            steps: fields
                .iter()
                .map(|f| PathStep::Field {
                    name: f.to_string(),
                    case: CaseSensitivity::Insensitive,
                })
                .collect(),
        })
    }

    pub fn select(select: Select) -> Self {
        Self::new(ExprKind::Select(Box::new(select)))
    }
}

impl FromSource {
    pub fn scan(expr: Expr, as_alias: impl Into<String>) -> Self {
        FromSource::Scan {
            expr,
            as_alias: Some(as_alias.into()),
            at_alias: None,
            by_alias: None,
        }
    }
}

/// Integer literals travel as decimal strings so any width survives serialization.
mod bigint_text {
    use std::fmt;
    use std::str::FromStr;

    use num_bigint::BigInt;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        deserializer.deserialize_any(BigIntVisitor)
    }

    struct BigIntVisitor;

    impl<'de> Visitor<'de> for BigIntVisitor {
        type Value = BigInt;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an integer or a decimal integer string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<BigInt, E> {
            Ok(BigInt::from(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<BigInt, E> {
            Ok(BigInt::from(v))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<BigInt, E> {
            BigInt::from_str(v.trim()).map_err(E::custom)
        }
    }
}
