//! Operators, indexing and iteration with Python semantics.

use std::cmp::Ordering;

use crate::ast::{BinOp, CmpOp};
use crate::error::{Raise, RaiseResult};
use crate::limits::EvalLimits;
use crate::value::{Value, format_float, py_cmp, py_eq, range_item, range_span};

fn unsupported(op: &str, a: &Value, b: &Value) -> Raise {
    Raise::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "** or pow()",
    }
}

pub(crate) fn binary_op(limits: &EvalLimits, op: BinOp, a: Value, b: Value) -> RaiseResult<Value> {
    if a.is_number() && b.is_number() {
        return numeric_op(op, &a, &b);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(mut x), Value::Str(y)) => {
            limits.check_len(x.len() + y.len())?;
            x.push_str(&y);
            Ok(Value::Str(x))
        }
        (BinOp::Add, Value::List(mut x), Value::List(y)) => {
            x.extend(y);
            let v = Value::List(x);
            limits.check_value(&v)?;
            Ok(v)
        }
        (BinOp::Add, Value::Tuple(mut x), Value::Tuple(y)) => {
            x.extend(y);
            let v = Value::Tuple(x);
            limits.check_value(&v)?;
            Ok(v)
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if is_int(&n) => {
            let times = repeat_count(&n);
            limits.check_len(s.len().checked_mul(times).unwrap_or(usize::MAX))?;
            Ok(Value::Str(s.repeat(times)))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items)) if is_int(&n) => {
            let times = repeat_count(&n);
            limits.check_repeat(&items, times)?;
            Ok(Value::List(repeat(&items, times)))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items)) if is_int(&n) => {
            let times = repeat_count(&n);
            limits.check_repeat(&items, times)?;
            Ok(Value::Tuple(repeat(&items, times)))
        }
        (BinOp::Mod, Value::Str(fmt), args) => {
            let s = percent_format(limits, &fmt, args)?;
            limits.check_len(s.len())?;
            Ok(Value::Str(s))
        }
        (op, a, b) => Err(unsupported(op_symbol(op), &a, &b)),
    }
}

fn is_int(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_))
}

fn repeat_count(n: &Value) -> usize {
    n.as_i64()
        .map(|n| usize::try_from(n.max(0)).unwrap_or(usize::MAX))
        .unwrap_or(0)
}

fn repeat(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn numeric_op(op: BinOp, a: &Value, b: &Value) -> RaiseResult<Value> {
    if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        let x = a.as_f64().unwrap_or(f64::NAN);
        let y = b.as_f64().unwrap_or(f64::NAN);
        return float_op(op, x, y).map(Value::Float);
    }
    let x = a.as_i64().unwrap_or(0);
    let y = b.as_i64().unwrap_or(0);
    match op {
        BinOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(Raise::overflow),
        BinOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(Raise::overflow),
        BinOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(Raise::overflow),
        BinOp::Div => {
            if y == 0 {
                return Err(Raise::zero_division("division by zero"));
            }
            Ok(Value::Float(x as f64 / y as f64))
        }
        BinOp::FloorDiv => int_floordiv(x, y).map(Value::Int),
        BinOp::Mod => int_mod(x, y).map(Value::Int),
        BinOp::Pow => int_pow(x, y),
    }
}

pub(crate) fn int_floordiv(x: i64, y: i64) -> RaiseResult<i64> {
    if y == 0 {
        return Err(Raise::zero_division("integer division or modulo by zero"));
    }
    let q = x.checked_div(y).ok_or_else(Raise::overflow)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

pub(crate) fn int_mod(x: i64, y: i64) -> RaiseResult<i64> {
    if y == 0 {
        return Err(Raise::zero_division("integer division or modulo by zero"));
    }
    let r = x.checked_rem(y).unwrap_or(0);
    if r != 0 && ((r < 0) != (y < 0)) {
        Ok(r + y)
    } else {
        Ok(r)
    }
}

pub(crate) fn int_pow(x: i64, y: i64) -> RaiseResult<Value> {
    if y < 0 {
        if x == 0 {
            return Err(Raise::zero_division(
                "0.0 cannot be raised to a negative power",
            ));
        }
        return Ok(Value::Float((x as f64).powf(y as f64)));
    }
    match u32::try_from(y) {
        Ok(exp) => x.checked_pow(exp).map(Value::Int).ok_or_else(Raise::overflow),
        Err(_) => match x {
            0 | 1 => Ok(Value::Int(x)),
            -1 => Ok(Value::Int(if y % 2 == 0 { 1 } else { -1 })),
            _ => Err(Raise::overflow()),
        },
    }
}

pub(crate) fn float_op(op: BinOp, x: f64, y: f64) -> RaiseResult<f64> {
    match op {
        BinOp::Add => Ok(x + y),
        BinOp::Sub => Ok(x - y),
        BinOp::Mul => Ok(x * y),
        BinOp::Div => {
            if y == 0.0 {
                return Err(Raise::zero_division("float division by zero"));
            }
            Ok(x / y)
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(Raise::zero_division("float floor division by zero"));
            }
            Ok((x / y).floor())
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(Raise::zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                Ok(r + y)
            } else {
                Ok(r)
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(Raise::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(Raise::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(Raise::Error(
                    "OverflowError",
                    "numerical result out of range".to_string(),
                ));
            }
            Ok(r)
        }
    }
}

pub(crate) fn negate(v: Value) -> RaiseResult<Value> {
    match v {
        Value::Bool(b) => Ok(Value::Int(-(b as i64))),
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(Raise::overflow),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(Raise::type_error(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))),
    }
}

pub(crate) fn positive(v: Value) -> RaiseResult<Value> {
    match v {
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Int(_) | Value::Float(_) => Ok(v),
        other => Err(Raise::type_error(format!(
            "bad operand type for unary +: '{}'",
            other.type_name()
        ))),
    }
}

pub(crate) fn compare(op: CmpOp, a: &Value, b: &Value) -> RaiseResult<bool> {
    Ok(match op {
        CmpOp::Eq => py_eq(a, b),
        CmpOp::NotEq => !py_eq(a, b),
        CmpOp::Lt => ordered(a, b)? == Some(Ordering::Less),
        CmpOp::LtE => matches!(ordered(a, b)?, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordered(a, b)? == Some(Ordering::Greater),
        CmpOp::GtE => matches!(ordered(a, b)?, Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => identical(a, b),
        CmpOp::IsNot => !identical(a, b),
    })
}

/// Ordering where any NaN operand makes every comparison false.
fn ordered(a: &Value, b: &Value) -> RaiseResult<Option<Ordering>> {
    let nan = |v: &Value| matches!(v, Value::Float(f) if f.is_nan());
    if a.is_number() && b.is_number() && (nan(a) || nan(b)) {
        return Ok(None);
    }
    py_cmp(a, b).map(Some)
}

/// `is` for immutable singletons; other values compare by equality of
/// type and content since rule values have no identity.
fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::None, _) | (_, Value::None) | (Value::Bool(_), _) | (_, Value::Bool(_)) => false,
        _ => a.type_name() == b.type_name() && py_eq(a, b),
    }
}

pub(crate) fn contains(container: &Value, item: &Value) -> RaiseResult<bool> {
    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Dict(map) => match item {
            Value::Str(k) => Ok(map.contains_key(k)),
            _ => Ok(false),
        },
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            other => Err(Raise::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Range { start, step, .. } => match item.as_i64() {
            Some(i) if item.is_number() && py_eq(item, &Value::Int(i)) => {
                let n = range_span(container);
                let offset = (i as i128 - *start as i128) / *step as i128;
                let exact = (i as i128 - *start as i128) % *step as i128 == 0;
                Ok(exact && offset >= 0 && offset < n)
            }
            _ => Ok(false),
        },
        other => Err(Raise::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

fn index_of(key: &Value) -> RaiseResult<i64> {
    match key {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(Raise::type_error(format!(
            "indices must be integers, not {}",
            other.type_name()
        ))),
    }
}

fn dict_key(key: &Value) -> RaiseResult<&str> {
    key.as_str().ok_or_else(|| {
        Raise::type_error(format!(
            "dict keys must be strings, not {}",
            key.type_name()
        ))
    })
}

pub(crate) fn key_error(key: &str) -> Raise {
    Raise::Error("KeyError", format!("'{key}'"))
}

pub(crate) fn getitem(value: &Value, key: &Value) -> RaiseResult<Value> {
    match value {
        Value::List(items) | Value::Tuple(items) => {
            let i = index_of(key)?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| {
                    Raise::Error(
                        "IndexError",
                        format!("{} index out of range", value.type_name()),
                    )
                })
        }
        Value::Str(s) => {
            let i = index_of(key)?;
            let chars: Vec<char> = s.chars().collect();
            normalize_index(i, chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .ok_or_else(|| Raise::Error("IndexError", "string index out of range".into()))
        }
        Value::Dict(map) => {
            let k = dict_key(key)?;
            map.get(k).cloned().ok_or_else(|| key_error(k))
        }
        Value::Range { start, step, .. } => {
            let n = range_span(value);
            let i = index_of(key)? as i128;
            let k = if i < 0 { i + n } else { i };
            if (0..n).contains(&k) {
                Ok(Value::Int(range_item(*start, *step, k)))
            } else {
                Err(Raise::Error("IndexError", "range object index out of range".into()))
            }
        }
        other => Err(Raise::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Mutable access to one element, used to walk assignment paths.
pub(crate) fn item_mut<'v>(value: &'v mut Value, key: &Value) -> RaiseResult<&'v mut Value> {
    let type_name = value.type_name();
    match value {
        Value::List(items) | Value::Tuple(items) => {
            let i = index_of(key)?;
            let len = items.len();
            normalize_index(i, len)
                .map(move |i| &mut items[i])
                .ok_or_else(|| Raise::Error("IndexError", format!("{type_name} index out of range")))
        }
        Value::Dict(map) => {
            let k = dict_key(key)?;
            let missing = key_error(k);
            map.get_mut(k).ok_or(missing)
        }
        _ => Err(Raise::type_error(format!(
            "'{type_name}' object is not subscriptable"
        ))),
    }
}

pub(crate) fn setitem(container: &mut Value, key: &Value, item: Value) -> RaiseResult<()> {
    match container {
        Value::List(items) => {
            let i = index_of(key)?;
            let slot = normalize_index(i, items.len()).ok_or_else(|| {
                Raise::Error("IndexError", "list assignment index out of range".into())
            })?;
            items[slot] = item;
            Ok(())
        }
        Value::Dict(map) => {
            let k = dict_key(key)?.to_string();
            map.insert(k, item);
            Ok(())
        }
        other => Err(Raise::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_bound(v: &Option<Value>) -> RaiseResult<Option<i64>> {
    match v {
        None | Some(Value::None) => Ok(None),
        Some(v) => index_of(v).map(Some),
    }
}

/// Python slice index arithmetic; returns the selected positions.
fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> RaiseResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Raise::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| {
        let v = if v < 0 { v + len } else { v };
        v.clamp(lo, hi)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map(|v| clamp(v, 0, len)).unwrap_or(0);
        let stop = upper.map(|v| clamp(v, 0, len)).unwrap_or(len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map(|v| clamp(v, -1, len - 1)).unwrap_or(len - 1);
        let stop = upper.map(|v| clamp(v, -1, len - 1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

pub(crate) fn slice(
    value: &Value,
    lower: Option<Value>,
    upper: Option<Value>,
    step: Option<Value>,
) -> RaiseResult<Value> {
    let (lo, hi, st) = (slice_bound(&lower)?, slice_bound(&upper)?, slice_bound(&step)?);
    match value {
        Value::List(items) => Ok(Value::List(
            slice_indices(items.len(), lo, hi, st)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Tuple(items) => Ok(Value::Tuple(
            slice_indices(items.len(), lo, hi, st)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(
                slice_indices(chars.len(), lo, hi, st)?
                    .into_iter()
                    .map(|i| chars[i])
                    .collect(),
            ))
        }
        other => Err(Raise::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Materialize an iterable. Ranges must be checked against the limits
/// by the caller before they are expanded.
pub(crate) fn into_items(limits: &EvalLimits, value: Value) -> RaiseResult<Vec<Value>> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(items),
        Value::Dict(map) => Ok(map.into_keys().map(Value::Str).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Range { start, step, .. } => {
            let n = range_span(&value);
            limits.check_len(usize::try_from(n).unwrap_or(usize::MAX))?;
            Ok((0..n).map(|k| Value::Int(range_item(start, step, k))).collect())
        }
        other => Err(Raise::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

/// printf-style `str % args` with `%s %r %d %i %f %e %g %x %%` and
/// optional width/precision.
fn percent_format(limits: &EvalLimits, fmt: &str, args: Value) -> RaiseResult<String> {
    let args = match args {
        Value::Tuple(items) => items,
        other => vec![other],
    };
    let mut args = args.into_iter();
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        while let Some(&n) = chars.peek() {
            if n.is_ascii_digit() || matches!(n, '.' | '-' | '+' | ' ' | '0') {
                spec.push(n);
                chars.next();
            } else {
                break;
            }
        }
        let Some(conv) = chars.next() else {
            return Err(Raise::value_error("incomplete format"));
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| Raise::type_error("not enough arguments for format string"))?;
        let (left, width, precision) = parse_spec(limits, &spec)?;
        let body = match conv {
            's' => arg.to_string(),
            'r' => arg.repr(),
            'd' | 'i' => match (&arg, arg.as_i64()) {
                (a, Some(i)) if a.is_number() => i.to_string(),
                _ => return Err(format_type_error(conv, &arg)),
            },
            'f' | 'F' | 'e' | 'g' => {
                let x = arg
                    .as_f64()
                    .filter(|_| arg.is_number())
                    .ok_or_else(|| format_type_error(conv, &arg))?;
                format_number(x, conv, precision)
            }
            'x' => match arg.as_i64() {
                Some(i) if arg.is_number() => format!("{i:x}"),
                _ => return Err(format_type_error(conv, &arg)),
            },
            other => {
                return Err(Raise::value_error(format!(
                    "unsupported format character '{other}'"
                )));
            }
        };
        out.push_str(&pad(&body, width, left));
    }
    if args.next().is_some() {
        return Err(Raise::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn format_type_error(conv: char, arg: &Value) -> Raise {
    Raise::type_error(format!(
        "%{conv} format: a real number is required, not {}",
        arg.type_name()
    ))
}

/// Past this many fractional digits every digit of an `f64` is zero.
const MAX_EXACT_PRECISION: usize = 1100;

/// Width and precision are element counts: both go through the limits
/// before any padding is built.
fn parse_spec(limits: &EvalLimits, spec: &str) -> RaiseResult<(bool, usize, Option<usize>)> {
    let left = spec.starts_with('-');
    let trimmed = spec.trim_start_matches(['-', '+', ' ', '0']);
    let (width, precision) = match trimmed.split_once('.') {
        Some((w, p)) => (spec_number(w)?, Some(spec_number(p)?)),
        None => (spec_number(trimmed)?, None),
    };
    limits.check_len(width)?;
    if let Some(p) = precision {
        limits.check_len(p)?;
    }
    Ok((left, width, precision))
}

fn spec_number(digits: &str) -> RaiseResult<usize> {
    if digits.is_empty() {
        return Ok(0);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Raise::value_error(format!("invalid format specifier '{digits}'")));
    }
    // Only overflow fails here; the limit check rejects it.
    Ok(digits.parse().unwrap_or(usize::MAX))
}

fn pad(body: &str, width: usize, left: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(body.chars().count()));
    if left {
        format!("{body}{fill}")
    } else {
        format!("{fill}{body}")
    }
}

pub(crate) fn format_number(x: f64, conv: char, precision: Option<usize>) -> String {
    if !x.is_finite() {
        return format_float(x);
    }
    let p = precision.unwrap_or(6);
    let exact = p.min(MAX_EXACT_PRECISION);
    let zeros = "0".repeat(p - exact);
    match conv {
        'e' => {
            let s = format!("{x:.exact$e}");
            match s.split_once('e') {
                Some((m, exp)) if exp.starts_with('-') => format!("{m}{zeros}e-{:0>2}", &exp[1..]),
                Some((m, exp)) => format!("{m}{zeros}e+{exp:0>2}"),
                None => s,
            }
        }
        'g' => format_float(x),
        _ => format!("{x:.exact$}{zeros}"),
    }
}

/// `str.format` with `{}`, `{0}` and `{:.2f}` style fields.
pub(crate) fn str_format(limits: &EvalLimits, fmt: &str, args: &[Value]) -> RaiseResult<String> {
    let mut out = String::new();
    let mut auto = 0usize;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(Raise::value_error("unmatched '{' in format string")),
                    }
                }
                let (name, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let index = if name.is_empty() {
                    auto += 1;
                    auto - 1
                } else {
                    name.parse::<usize>().map_err(|_| {
                        Raise::value_error(format!("unsupported format field '{name}'"))
                    })?
                };
                let arg = args.get(index).ok_or_else(|| {
                    Raise::Error(
                        "IndexError",
                        format!("replacement index {index} out of range"),
                    )
                })?;
                out.push_str(&format_field(limits, arg, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_field(limits: &EvalLimits, arg: &Value, spec: &str) -> RaiseResult<String> {
    if spec.is_empty() {
        return Ok(arg.to_string());
    }
    let (align, rest) = match spec.strip_prefix(['<', '>']) {
        Some(rest) => (spec.chars().next(), rest),
        None => (None, spec),
    };
    let (left, width, precision) =
        parse_spec(limits, rest.trim_end_matches(|c: char| c.is_alphabetic()))?;
    let conv = spec.chars().last().filter(|c| c.is_alphabetic());
    let body = match conv {
        Some(c @ ('f' | 'e' | 'g')) => {
            let x = arg
                .as_f64()
                .filter(|_| arg.is_number())
                .ok_or_else(|| format_type_error(c, arg))?;
            format_number(x, c, precision)
        }
        Some('d') => match arg.as_i64() {
            Some(i) if matches!(arg, Value::Int(_) | Value::Bool(_)) => i.to_string(),
            _ => return Err(format_type_error('d', arg)),
        },
        Some('s') | None => arg.to_string(),
        Some(other) => {
            return Err(Raise::value_error(format!(
                "unknown format code '{other}'"
            )));
        }
    };
    let left = match align {
        Some(c) => c == '<',
        None => left || matches!(arg, Value::Str(_)),
    };
    Ok(pad(&body, width, left))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> EvalLimits {
        EvalLimits::with_defaults()
    }

    fn op(op: BinOp, a: impl Into<Value>, b: impl Into<Value>) -> RaiseResult<Value> {
        binary_op(&limits(), op, a.into(), b.into())
    }

    #[test]
    fn division_semantics() {
        assert_eq!(op(BinOp::Div, 7, 2).unwrap(), Value::Float(3.5));
        assert_eq!(op(BinOp::FloorDiv, -7, 2).unwrap(), Value::Int(-4));
        assert_eq!(op(BinOp::Mod, -7, 2).unwrap(), Value::Int(1));
        assert_eq!(op(BinOp::Mod, 7, -2).unwrap(), Value::Int(-1));
        assert_eq!(op(BinOp::Mod, -7.5, 2.0).unwrap(), Value::Float(0.5));
        assert!(op(BinOp::Div, 1, 0).is_err());
        assert!(op(BinOp::Mod, 1.0, 0.0).is_err());
    }

    #[test]
    fn power_semantics() {
        assert_eq!(op(BinOp::Pow, 2, 10).unwrap(), Value::Int(1024));
        assert_eq!(op(BinOp::Pow, 2, -1).unwrap(), Value::Float(0.5));
        assert_eq!(op(BinOp::Pow, 1, i64::MAX).unwrap(), Value::Int(1));
        assert!(op(BinOp::Pow, 10, 30).is_err());
        assert!(op(BinOp::Pow, -8.0, 0.5).is_err());
    }

    #[test]
    fn overflow_is_an_error() {
        assert_eq!(op(BinOp::Add, i64::MAX, 1).unwrap_err(), Raise::overflow());
        assert!(negate(Value::Int(i64::MIN)).is_err());
    }

    #[test]
    fn bools_are_integers() {
        assert_eq!(op(BinOp::Add, true, true).unwrap(), Value::Int(2));
        assert_eq!(op(BinOp::Mul, true, 2.5).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn sequence_operators() {
        assert_eq!(op(BinOp::Add, "ab", "cd").unwrap(), Value::from("abcd"));
        assert_eq!(op(BinOp::Mul, "ab", 3).unwrap(), Value::from("ababab"));
        assert_eq!(
            op(BinOp::Mul, Value::List(vec![Value::Int(1)]), 3).unwrap(),
            Value::List(vec![Value::Int(1); 3])
        );
        assert!(op(BinOp::Add, "a", 1).is_err());
        assert!(matches!(
            op(BinOp::Mul, "a", 2_000_000),
            Err(Raise::Resource(_))
        ));
    }

    #[test]
    fn comparisons_follow_python() {
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
        assert!(compare(CmpOp::In, &Value::from("a"), &Value::from("cat")).unwrap());
        assert!(compare(CmpOp::In, &Value::Int(4), &Value::Range { start: 0, stop: 10, step: 2 }).unwrap());
        assert!(!compare(CmpOp::In, &Value::Int(5), &Value::Range { start: 0, stop: 10, step: 2 }).unwrap());
        assert!(compare(CmpOp::Is, &Value::None, &Value::None).unwrap());
        assert!(compare(CmpOp::IsNot, &Value::Int(0), &Value::None).unwrap());
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::from("a")).is_err());
    }

    #[test]
    fn indexing_and_slicing() {
        let list = Value::List((0..5).map(Value::Int).collect());
        assert_eq!(getitem(&list, &Value::Int(-1)).unwrap(), Value::Int(4));
        assert!(getitem(&list, &Value::Int(5)).is_err());
        assert_eq!(
            slice(&list, Some(Value::Int(1)), Some(Value::Int(3)), None).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            slice(&list, None, None, Some(Value::Int(-2))).unwrap(),
            Value::List(vec![Value::Int(4), Value::Int(2), Value::Int(0)])
        );
        assert_eq!(
            slice(&Value::from("hello"), Some(Value::Int(-3)), None, None).unwrap(),
            Value::from("llo")
        );
    }

    #[test]
    fn dict_keys_must_be_strings() {
        let mut d = Value::Dict(Default::default());
        assert!(setitem(&mut d, &Value::Int(1), Value::Int(1)).is_err());
        setitem(&mut d, &Value::from("a"), Value::Int(1)).unwrap();
        assert_eq!(getitem(&d, &Value::from("a")).unwrap(), Value::Int(1));
        assert!(matches!(
            getitem(&d, &Value::from("b")),
            Err(Raise::Error("KeyError", _))
        ));
    }

    #[test]
    fn percent_formatting() {
        let s = op(
            BinOp::Mod,
            "%s nodes, load %.2f%%",
            Value::Tuple(vec![Value::Int(3), Value::Float(0.456)]),
        )
        .unwrap();
        assert_eq!(s, Value::from("3 nodes, load 0.46%"));
        assert!(op(BinOp::Mod, "%d %d", 1).is_err());
    }

    #[test]
    fn wide_fields_pad_without_panicking() {
        let Value::Str(s) = op(BinOp::Mod, "%70000d", 1).unwrap() else {
            panic!("expected a string");
        };
        assert_eq!(s.len(), 70000);
        assert!(s.ends_with(" 1"));

        let Value::Str(s) = op(BinOp::Mod, "%-70000s|", "x").unwrap() else {
            panic!("expected a string");
        };
        assert!(s.starts_with("x ") && s.ends_with(" |"));

        let Value::Str(s) = op(BinOp::Mod, "%.70000f", 0.5).unwrap() else {
            panic!("expected a string");
        };
        assert_eq!(s.len(), 70002);
        assert!(s.starts_with("0.5000"));
    }

    #[test]
    fn oversized_fields_hit_the_limits() {
        assert!(matches!(
            op(BinOp::Mod, "%400000000d", 1),
            Err(Raise::Resource(_))
        ));
        assert!(matches!(
            op(BinOp::Mod, "%.400000000f", 1.0),
            Err(Raise::Resource(_))
        ));
        assert!(matches!(
            op(BinOp::Mod, "%99999999999999999999999d", 1),
            Err(Raise::Resource(_))
        ));
    }

    #[test]
    fn format_method() {
        assert_eq!(
            str_format(&limits(), "{} of {}: {:.1f}", &[Value::Int(1), Value::Int(2), Value::Float(0.26)]).unwrap(),
            "1 of 2: 0.3"
        );
        assert_eq!(str_format(&limits(), "{1}{0}", &[Value::from("a"), Value::from("b")]).unwrap(), "ba");
        assert!(str_format(&limits(), "{", &[]).is_err());
        assert_eq!(
            str_format(&limits(), "{:70000d}", &[Value::Int(7)]).unwrap().len(),
            70000
        );
        assert_eq!(
            str_format(&limits(), "[{:>4}|{:<4d}]", &[Value::from("ab"), Value::Int(7)]).unwrap(),
            "[  ab|7   ]"
        );
    }
}
