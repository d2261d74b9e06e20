//! Error types for nestql-core.
//!
//! Every failure carries a stable [`ErrorCode`], a human readable message and,
//! when known, the source location of the node that raised it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{IntWidth, Value, ValueType};

/// Position of a node in the query text (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Kind-specific error payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("Ambiguous binding '{name}': matches {}", joined(.matches))]
    AmbiguousBinding { name: String, matches: Vec<String> },

    #[error("{} '{name}' is not defined", variable_label(.quoted))]
    UndefinedVariable { name: String, quoted: bool },

    #[error("Division by zero")]
    DivideByZero,

    #[error("Modulo by zero")]
    ModuloByZero,

    #[error("Integer overflow: result does not fit in {width}")]
    IntegerOverflow { width: IntWidth },

    #[error("Cannot cast {from} to {to}")]
    CastFailed { from: ValueType, to: ValueType },

    #[error("LIMIT must not be negative, got {value}")]
    NegativeLimit { value: i64 },

    #[error("OFFSET must not be negative, got {value}")]
    NegativeOffset { value: i64 },

    #[error("{clause} value must be an integer, got {found}")]
    NonIntegerLimitOrOffsetValue { clause: &'static str, found: ValueType },

    #[error("No value bound for parameter {ordinal} ({bound} parameters bound)")]
    UnboundParameter { ordinal: usize, bound: usize },

    #[error("Type mismatch in {operation}: expected {expected}, got {found}")]
    TypeMismatch {
        operation: String,
        expected: String,
        found: Value,
    },

    #[error("Join kind {kind} is not supported")]
    UnsupportedJoinKind { kind: String },

    #[error("Aggregate {function} cannot be used here: {reason}")]
    AggregateMisuse {
        function: String,
        reason: &'static str,
    },

    #[error("Variable '{name}' must appear in GROUP BY or be used in an aggregate")]
    VariableNotInGroupBy { name: String },

    #[error("Integer literal {literal} does not fit in 64 bits")]
    LiteralIntegerOverflow { literal: String },

    #[error("Runtime value of type {found} does not match expected static type {expected}")]
    ReturnTypeMismatch { expected: String, found: ValueType },

    #[error("{operator} expects {expected} operands, got {found}")]
    InvalidArity {
        operator: String,
        expected: String,
        found: usize,
    },

    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("Invalid LIKE pattern '{pattern}': {reason}")]
    InvalidLikePattern { pattern: String, reason: String },

    #[error("Evaluation interrupted")]
    Interrupted,
}

/// Stable, payload-free identifier of an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    AmbiguousBinding,
    UndefinedVariable,
    DivideByZero,
    ModuloByZero,
    IntegerOverflow,
    CastFailed,
    NegativeLimit,
    NegativeOffset,
    NonIntegerLimitOrOffsetValue,
    UnboundParameter,
    TypeMismatch,
    UnsupportedJoinKind,
    AggregateMisuse,
    VariableNotInGroupBy,
    LiteralIntegerOverflow,
    ReturnTypeMismatch,
    InvalidArity,
    UnknownFunction,
    InvalidLikePattern,
    Interrupted,
}

impl ErrorKind {
    pub fn code(&self) -> ErrorCode {
        match self {
            ErrorKind::AmbiguousBinding { .. } => ErrorCode::AmbiguousBinding,
            ErrorKind::UndefinedVariable { .. } => ErrorCode::UndefinedVariable,
            ErrorKind::DivideByZero => ErrorCode::DivideByZero,
            ErrorKind::ModuloByZero => ErrorCode::ModuloByZero,
            ErrorKind::IntegerOverflow { .. } => ErrorCode::IntegerOverflow,
            ErrorKind::CastFailed { .. } => ErrorCode::CastFailed,
            ErrorKind::NegativeLimit { .. } => ErrorCode::NegativeLimit,
            ErrorKind::NegativeOffset { .. } => ErrorCode::NegativeOffset,
            ErrorKind::NonIntegerLimitOrOffsetValue { .. } => {
                ErrorCode::NonIntegerLimitOrOffsetValue
            }
            ErrorKind::UnboundParameter { .. } => ErrorCode::UnboundParameter,
            ErrorKind::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            ErrorKind::UnsupportedJoinKind { .. } => ErrorCode::UnsupportedJoinKind,
            ErrorKind::AggregateMisuse { .. } => ErrorCode::AggregateMisuse,
            ErrorKind::VariableNotInGroupBy { .. } => ErrorCode::VariableNotInGroupBy,
            ErrorKind::LiteralIntegerOverflow { .. } => ErrorCode::LiteralIntegerOverflow,
            ErrorKind::ReturnTypeMismatch { .. } => ErrorCode::ReturnTypeMismatch,
            ErrorKind::InvalidArity { .. } => ErrorCode::InvalidArity,
            ErrorKind::UnknownFunction { .. } => ErrorCode::UnknownFunction,
            ErrorKind::InvalidLikePattern { .. } => ErrorCode::InvalidLikePattern,
            ErrorKind::Interrupted => ErrorCode::Interrupted,
        }
    }

    /// Data-dependent conditions. The permissive typing mode turns these into MISSING;
    /// everything else is a definite fault and always raised.
    pub fn is_data_condition(&self) -> bool {
        matches!(
            self,
            ErrorKind::TypeMismatch { .. }
                | ErrorKind::CastFailed { .. }
                | ErrorKind::IntegerOverflow { .. }
                | ErrorKind::UndefinedVariable { .. }
                | ErrorKind::InvalidLikePattern { .. }
        )
    }
}

fn joined(names: &[String]) -> String {
    names.join(", ")
}

fn variable_label(quoted: &bool) -> &'static str {
    if *quoted {
        "Quoted variable"
    } else {
        "Variable"
    }
}

fn located(location: &Option<SourceLocation>) -> String {
    match location {
        Some(loc) => format!(" (at {})", loc),
        None => String::new(),
    }
}

/// Evaluation or compilation error.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}{}", located(.location))]
pub struct EvalError {
    kind: ErrorKind,
    location: Option<SourceLocation>,
}

impl EvalError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    /// Attach a location unless one is already recorded; the innermost node wins.
    pub fn at(mut self, location: Option<SourceLocation>) -> Self {
        if self.location.is_none() {
            self.location = location;
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> ErrorCode {
        self.kind.code()
    }

    pub fn location(&self) -> Option<SourceLocation> {
        self.location
    }

    pub fn is_data_condition(&self) -> bool {
        self.kind.is_data_condition()
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }

    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted)
    }

    pub fn type_mismatch(
        operation: impl Into<String>,
        expected: impl Into<String>,
        found: &Value,
    ) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            operation: operation.into(),
            expected: expected.into(),
            found: found.clone(),
        })
    }
}

impl From<ErrorKind> for EvalError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result type for nestql operations
pub type EvalResult<T> = Result<T, EvalError>;

impl serde::Serialize for EvalError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
