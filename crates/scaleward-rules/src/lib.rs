//! scaleward-rules: sandboxed evaluation of scaling rules.
//!
//! Rules are written in a small indentation-structured language with
//! Python's numeric semantics and a numpy-like function library. The
//! pieces:
//!
//! - **Language**: lexer, parser (rejects forbidden constructs up front)
//!   and a tree-walking interpreter over owned [`Value`]s
//! - **Isolation**: every evaluation runs on its own OS thread with a
//!   deep copy of its inputs, bounded by [`EvalLimits`] and a wall-clock
//!   timeout enforced from the async side
//! - **Output**: text printed by rules flows through an [`OutputSink`]
//!   into the `scaleward::usercode` tracing target
//!
//! ```text
//! RuleEvaluator::evaluate(source, inputs, outputs)
//!   ├── parser::parse            (Syntax errors, nothing runs)
//!   ├── thread "rule-eval"       (Interpreter + EvalLimits + deadline)
//!   │     └── print → SinkWriter ─▶ OutputSink ─▶ tracing
//!   └── tokio::time::timeout     (TimedOut, cancel flag raised)
//! ```

mod ast;
mod builtins;
pub mod error;
pub mod evaluator;
mod interp;
mod lexer;
pub mod limits;
mod ops;
mod parser;
pub mod sink;
pub mod value;

pub use error::{EvalError, EvalResult};
pub use evaluator::{DEFAULT_TIMEOUT, RuleEvaluator, check_syntax};
pub use limits::EvalLimits;
pub use sink::{OutputSink, SinkWriter, USERCODE_TARGET};
pub use value::{Bindings, Callable, Value};
