//! Rule evaluation error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for rule evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Why an evaluation failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// Malformed rule text or a construct the language forbids.
    /// Raised before any statement runs.
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// The rule did not finish within its wall-clock budget.
    #[error("timed out after {:.3} seconds", elapsed.as_secs_f64())]
    TimedOut { elapsed: Duration },

    /// The rule raised a language error while running.
    #[error("line {line}: {message}")]
    Runtime { line: usize, message: String },

    /// The rule exceeded an evaluation limit.
    #[error("line {line}: resource limit exceeded: {message}")]
    Resource { line: usize, message: String },

    /// The evaluation worker could not be started or died.
    #[error("evaluation worker failed: {0}")]
    Worker(String),

    /// Cooperative interruption observed inside the interpreter.
    #[error("evaluation interrupted")]
    Interrupted,
}

impl EvalError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        EvalError::Syntax {
            line,
            message: message.into(),
        }
    }

    /// `true` for malformed or disallowed rule text.
    pub fn is_syntax(&self) -> bool {
        matches!(self, EvalError::Syntax { .. })
    }

    /// `true` when the wall-clock budget was exceeded.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EvalError::TimedOut { .. })
    }
}

/// A language-level error raised while executing, before a line is attached.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Raise {
    /// Python-style exception: kind (`TypeError`, ...) and message.
    Error(&'static str, String),
    Resource(String),
    Interrupted,
}

impl Raise {
    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        Raise::Error("TypeError", msg.into())
    }

    pub(crate) fn value_error(msg: impl Into<String>) -> Self {
        Raise::Error("ValueError", msg.into())
    }

    pub(crate) fn zero_division(msg: impl Into<String>) -> Self {
        Raise::Error("ZeroDivisionError", msg.into())
    }

    pub(crate) fn overflow() -> Self {
        Raise::Error("OverflowError", "integer result out of range".to_string())
    }

    pub(crate) fn at(self, line: usize) -> EvalError {
        match self {
            Raise::Error(kind, msg) => EvalError::Runtime {
                line,
                message: format!("{kind}: {msg}"),
            },
            Raise::Resource(message) => EvalError::Resource { line, message },
            Raise::Interrupted => EvalError::Interrupted,
        }
    }
}

pub(crate) type RaiseResult<T> = Result<T, Raise>;
