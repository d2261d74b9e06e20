//! Compile options.

use serde::{Deserialize, Serialize};

/// How data-dependent type and undefined-variable conditions are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingMode {
    /// Raise and terminate the query.
    #[default]
    Legacy,
    /// Substitute MISSING and continue.
    Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedVariableBehavior {
    #[default]
    Error,
    Missing,
}

/// Whether MISSING projection items are dropped from SELECT list structs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionIteration {
    #[default]
    FilterMissing,
    Unfiltered,
}

/// Immutable once built; share it with `Arc` across compilations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub typing_mode: TypingMode,
    pub undefined_variable: UndefinedVariableBehavior,
    /// Offset applied to TIME WITH TIME ZONE literals written without one.
    pub default_timezone_offset_minutes: i32,
    pub projection_iteration: ProjectionIteration,
}

impl CompileOptions {
    pub fn builder() -> CompileOptionsBuilder {
        CompileOptionsBuilder::default()
    }

    pub fn permissive() -> Self {
        Self::builder().typing_mode(TypingMode::Permissive).build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptionsBuilder {
    options: CompileOptions,
}

impl CompileOptionsBuilder {
    pub fn typing_mode(mut self, mode: TypingMode) -> Self {
        self.options.typing_mode = mode;
        self
    }

    pub fn undefined_variable(mut self, behavior: UndefinedVariableBehavior) -> Self {
        self.options.undefined_variable = behavior;
        self
    }

    pub fn default_timezone_offset_minutes(mut self, minutes: i32) -> Self {
        self.options.default_timezone_offset_minutes = minutes;
        self
    }

    pub fn projection_iteration(mut self, behavior: ProjectionIteration) -> Self {
        self.options.projection_iteration = behavior;
        self
    }

    pub fn build(self) -> CompileOptions {
        self.options
    }
}
