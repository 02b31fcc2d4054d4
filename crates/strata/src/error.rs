use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::value::DPattern;

/// Result type alias for engine operations that can fail.
pub type EngineResult<T> = Result<T, EngineError>;

/// Pipeline stage an error was raised from.
///
/// Uses strum derives for automatic `Display` and `Into<&'static str>`; the
/// string form is the kebab-case stage tag (e.g. `ExprEval` -> "expr-eval").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    /// Pattern matching against a term.
    Match,
    /// Expression evaluation (including binding lists).
    ExprEval,
    /// Meta-function dispatch and evaluation.
    MfEval,
    /// S-expression reading or space-directed term parsing.
    Parse,
    /// Space membership checking.
    InSpace,
    /// Language construction-time validation.
    Language,
    /// A step or state budget was exhausted during fixed-point iteration.
    Limit,
}

/// Error raised synchronously by the engine.
///
/// Carries the stage it originated from, a message, and optionally the
/// offending value. Match *failure* is never an `EngineError`: failed
/// matches prune a branch silently. Errors mean the language definition
/// itself is broken (undefined space, unbound variable, arity mismatch) or
/// a partial operation was applied outside its domain.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    /// Stage tag identifying where the error was raised.
    pub stage: Stage,
    /// Human-readable description.
    pub message: String,
    /// The value the operation choked on, when one exists.
    pub offending: Option<DPattern>,
}

impl EngineError {
    /// Creates an error with no offending value attached.
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            offending: None,
        }
    }

    /// Creates an error carrying the value the operation failed on.
    pub fn with_value(stage: Stage, message: impl Into<String>, value: DPattern) -> Self {
        Self {
            stage,
            message: message.into(),
            offending: Some(value),
        }
    }

    /// Shorthand for a `Stage::Match` structural error.
    pub fn matching(message: impl Into<String>) -> Self {
        Self::new(Stage::Match, message)
    }

    /// Shorthand for a `Stage::ExprEval` error.
    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(Stage::ExprEval, message)
    }

    /// Shorthand for a `Stage::MfEval` error.
    pub fn mf(message: impl Into<String>) -> Self {
        Self::new(Stage::MfEval, message)
    }

    /// Shorthand for a `Stage::Parse` error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(Stage::Parse, message)
    }

    /// Shorthand for a `Stage::InSpace` error.
    pub fn in_space(message: impl Into<String>) -> Self {
        Self::new(Stage::InSpace, message)
    }

    /// Shorthand for a `Stage::Language` construction error.
    pub fn language(message: impl Into<String>) -> Self {
        Self::new(Stage::Language, message)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{stage}] {msg}", stage = self.stage, msg = self.message)?;
        if let Some(value) = &self.offending {
            write!(f, ": {value}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}
