//! Runtime values of the rule language.
//!
//! Values are plain owned data: a binding handed to the sandbox is a deep
//! copy, and nothing the rule does can reach back into the caller.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Raise, RaiseResult};

/// Ranges longer than this serialize as their bounds, not their elements.
const MAX_JSON_RANGE: i64 = 1_000_000;

/// Name → value map used for inputs and outputs of an evaluation.
pub type Bindings = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    /// Lazy `range(start, stop, step)`; `step` is never zero.
    Range { start: i64, stop: i64, step: i64 },
    Callable(Callable),
    Module(Module),
}

/// Something a rule can call.
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    Builtin(Builtin),
    /// Returns a fixed value; used to expose host-provided data such as
    /// optimizer advice as a function.
    Constant(Box<Value>),
}

/// Host modules reachable from rule text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Time,
}

/// The fixed function library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Range,
    Len,
    Abs,
    Min,
    Max,
    Sum,
    Round,
    Int,
    Float,
    Bool,
    Str,
    List,
    Tuple,
    Sorted,
    Any,
    All,
    Ceil,
    Floor,
    Sqrt,
    Exp,
    Log,
    Log10,
    Log2,
    Pow,
    Mean,
    Median,
    Std,
    Var,
    Clip,
    IsNan,
    IsInf,
    TimeTime,
}

impl Builtin {
    /// Builtins bound by name in every fresh scope.
    pub const GLOBALS: &'static [(&'static str, Builtin)] = &[
        ("print", Builtin::Print),
        ("range", Builtin::Range),
        ("len", Builtin::Len),
        ("abs", Builtin::Abs),
        ("min", Builtin::Min),
        ("max", Builtin::Max),
        ("sum", Builtin::Sum),
        ("round", Builtin::Round),
        ("int", Builtin::Int),
        ("float", Builtin::Float),
        ("bool", Builtin::Bool),
        ("str", Builtin::Str),
        ("list", Builtin::List),
        ("tuple", Builtin::Tuple),
        ("sorted", Builtin::Sorted),
        ("any", Builtin::Any),
        ("all", Builtin::All),
        ("ceil", Builtin::Ceil),
        ("floor", Builtin::Floor),
        ("sqrt", Builtin::Sqrt),
        ("exp", Builtin::Exp),
        ("log", Builtin::Log),
        ("log10", Builtin::Log10),
        ("log2", Builtin::Log2),
        ("pow", Builtin::Pow),
        ("mean", Builtin::Mean),
        ("median", Builtin::Median),
        ("std", Builtin::Std),
        ("var", Builtin::Var),
        ("clip", Builtin::Clip),
        ("isnan", Builtin::IsNan),
        ("isinf", Builtin::IsInf),
    ];

    pub fn name(self) -> &'static str {
        if self == Builtin::TimeTime {
            return "time";
        }
        Self::GLOBALS
            .iter()
            .find(|(_, b)| *b == self)
            .map(|(n, _)| *n)
            .unwrap_or("builtin")
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Callable(_) => "function",
            Value::Module(_) => "module",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Range { .. } => range_span(self) > 0,
            Value::Callable(_) | Value::Module(_) => true,
        }
    }

    /// Integer view, following `int()` for floats (truncation).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    /// Convert from JSON; integers that do not fit `i64` become floats.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON. Non-finite floats, functions and modules become `null`.
    /// Very long ranges become `{start, stop, step}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::None | Value::Callable(_) | Value::Module(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) | Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Dict(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Range { start, stop, step } if range_span(self) > MAX_JSON_RANGE as i128 => {
                serde_json::json!({"start": start, "stop": stop, "step": step})
            }
            Value::Range { start, stop, step } => {
                let mut out = Vec::new();
                let mut i = *start;
                while (*step > 0 && i < *stop) || (*step < 0 && i > *stop) {
                    out.push(serde_json::Value::from(i));
                    i = match i.checked_add(*step) {
                        Some(n) => n,
                        None => break,
                    };
                }
                serde_json::Value::Array(out)
            }
        }
    }

    /// Python `repr()`.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Python `str()`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => write_seq(f, "[", "]", items),
            Value::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0].repr()),
            Value::Tuple(items) => write_seq(f, "(", ")", items),
            Value::Dict(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{k}': {}", v.repr())?;
                }
                f.write_str("}")
            }
            Value::Range { start, stop, step } if *step == 1 => write!(f, "range({start}, {stop})"),
            Value::Range { start, stop, step } => write!(f, "range({start}, {stop}, {step})"),
            Value::Callable(Callable::Builtin(b)) => write!(f, "<built-in function {}>", b.name()),
            Value::Callable(Callable::Constant(_)) => f.write_str("<function>"),
            Value::Module(Module::Time) => f.write_str("<module 'time'>"),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, close: &str, items: &[Value]) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&item.repr())?;
    }
    f.write_str(close)
}

/// Format a float the way Python prints it (`1.0`, `0.5`, `1e+20`, `inf`).
pub(crate) fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == x.trunc() && x.abs() < 1e16 {
        return format!("{x:.1}");
    }
    let abs = x.abs();
    if !(1e-4..1e16).contains(&abs) {
        let s = format!("{x:e}");
        // Rust prints `1e20`; Python prints `1e+20`.
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp:0>2}"),
            Some((mantissa, exp)) => format!("{mantissa}e-{:0>2}", &exp[1..]),
            None => s,
        };
    }
    format!("{x}")
}

/// Number of elements in a range, in `i128` so no bounds can overflow it.
pub(crate) fn range_span(v: &Value) -> i128 {
    match v {
        Value::Range { start, stop, step } => {
            let (start, stop, step) = (*start as i128, *stop as i128, *step as i128);
            let n = if step > 0 {
                (stop - start + step - 1) / step
            } else {
                (start - stop - step - 1) / -step
            };
            n.max(0)
        }
        _ => 0,
    }
}

/// `len()` of a range; lengths past `i64::MAX` raise OverflowError.
pub(crate) fn range_len(v: &Value) -> RaiseResult<i64> {
    i64::try_from(range_span(v)).map_err(|_| Raise::overflow())
}

/// The `k`-th element of a range. For `k` below the span the element lies
/// between start and stop, so the narrowing cast is exact.
pub(crate) fn range_item(start: i64, step: i64, k: i128) -> i64 {
    (start as i128 + step as i128 * k) as i64
}

/// Python `==`.
pub(crate) fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (x, y) if x.is_number() && y.is_number() => match (x, y) {
            (Value::Float(_), _) | (_, Value::Float(_)) => x.as_f64() == y.as_f64(),
            _ => x.as_i64() == y.as_i64(),
        },
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| py_eq(p, q))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| py_eq(v, w)))
        }
        (Value::Range { .. }, Value::Range { .. }) => a == b,
        (Value::Callable(x), Value::Callable(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        _ => false,
    }
}

/// Python ordering for `<`, `min`, `sorted`, ...
pub(crate) fn py_cmp(a: &Value, b: &Value) -> RaiseResult<Ordering> {
    match (a, b) {
        (x, y) if x.is_number() && y.is_number() => match (x, y) {
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                let (p, q) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
                // NaN compares false both ways; treat as equal for ordering.
                Ok(p.partial_cmp(&q).unwrap_or(Ordering::Equal))
            }
            _ => Ok(x.as_i64().cmp(&y.as_i64())),
        },
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (p, q) in x.iter().zip(y) {
                if !py_eq(p, q) {
                    return py_cmp(p, q);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(Raise::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}
