//! Built-in functions, the numeric library and container methods.
//!
//! The numeric helpers (`ceil`, `sqrt`, `mean`, ...) follow numpy: they
//! return floats, accept lists element-wise and produce `nan`/`inf`
//! instead of raising for domain errors.

use std::cmp::Ordering;

use crate::error::{Raise, RaiseResult};
use crate::interp::Interpreter;
use crate::limits::{EvalLimits, is_container};
use crate::ops::{self, into_items, str_format};
use crate::value::{Builtin, Value, py_cmp, py_eq, range_item, range_len, range_span};
use crate::ast::BinOp;

type Kwargs = Vec<(String, Value)>;

/// Methods that change their receiver in place.
pub(crate) const MUTATING_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "clear", "reverse", "sort", "update",
    "setdefault",
];

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> RaiseResult<()> {
    let n = args.len();
    if n < min || n > max {
        let expected = if min == max {
            format!("exactly {min}")
        } else if n < min {
            format!("at least {min}")
        } else {
            format!("at most {max}")
        };
        return Err(Raise::type_error(format!(
            "{name}() takes {expected} argument{} ({n} given)",
            if min == max && min == 1 { "" } else { "s" }
        )));
    }
    Ok(())
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> RaiseResult<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(Raise::type_error(format!(
            "{name}() takes no keyword arguments"
        )))
    }
}

/// Take the named keyword arguments, rejecting any other.
fn take_kwargs<const N: usize>(
    name: &str,
    kwargs: Kwargs,
    allowed: [&str; N],
) -> RaiseResult<[Option<Value>; N]> {
    let mut out: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (key, value) in kwargs {
        match allowed.iter().position(|a| *a == key) {
            Some(i) => out[i] = Some(value),
            None => {
                return Err(Raise::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
        }
    }
    Ok(out)
}

fn integer_arg(v: &Value) -> RaiseResult<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(Raise::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

fn number_arg(name: &str, v: &Value) -> RaiseResult<f64> {
    match v {
        v if v.is_number() => Ok(v.as_f64().unwrap_or(f64::NAN)),
        other => Err(Raise::type_error(format!(
            "{name}(): must be real number, not {}",
            other.type_name()
        ))),
    }
}

/// Visit every element of an iterable, ticking the interpreter clock so
/// long ranges stay interruptible.
fn for_each(
    interp: &mut Interpreter<'_>,
    value: Value,
    mut f: impl FnMut(Value) -> RaiseResult<()>,
) -> RaiseResult<()> {
    if let Value::Range { start, step, .. } = value {
        for k in 0..range_span(&value) {
            interp.tick()?;
            f(Value::Int(range_item(start, step, k)))?;
        }
        return Ok(());
    }
    let limits = interp.limits;
    for item in into_items(&limits, value)? {
        interp.tick()?;
        f(item)?;
    }
    Ok(())
}

pub(crate) fn call_builtin(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> RaiseResult<Value> {
    let name = builtin.name();
    if !matches!(
        builtin,
        Builtin::Print | Builtin::Round | Builtin::Sorted | Builtin::Min | Builtin::Max | Builtin::Sum
    ) {
        no_kwargs(name, &kwargs)?;
    }
    match builtin {
        Builtin::Print => {
            let [sep, end] = take_kwargs(name, kwargs, ["sep", "end"])?;
            let sep = sep.map(|v| v.to_string()).unwrap_or_else(|| " ".to_string());
            let end = end.map(|v| v.to_string()).unwrap_or_default();
            let mut line = args
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(&sep);
            if end != "\n" {
                line.push_str(&end);
            }
            interp.emit(line);
            Ok(Value::None)
        }
        Builtin::Range => {
            arity(name, &args, 1, 3)?;
            let ints = args.iter().map(integer_arg).collect::<RaiseResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(Raise::type_error("range expected at most 3 arguments")),
            };
            if step == 0 {
                return Err(Raise::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        Builtin::Len => {
            arity(name, &args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count() as i64,
                Value::List(v) | Value::Tuple(v) => v.len() as i64,
                Value::Dict(d) => d.len() as i64,
                r @ Value::Range { .. } => range_len(r)?,
                other => {
                    return Err(Raise::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(n))
        }
        Builtin::Abs => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(Raise::overflow),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(Raise::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        Builtin::Min | Builtin::Max => {
            let [default] = take_kwargs(name, kwargs, ["default"])?;
            extremum(interp, builtin == Builtin::Max, args, default)
        }
        Builtin::Sum => {
            let [start] = take_kwargs(name, kwargs, ["start"])?;
            arity(name, &args, 1, 2)?;
            let mut args = args.into_iter();
            let iterable = args.next().unwrap_or(Value::None);
            let mut total = args.next().or(start).unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(Raise::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            let limits = interp.limits;
            for_each(interp, iterable, |item| {
                let acc = std::mem::replace(&mut total, Value::None);
                total = ops::binary_op(&limits, BinOp::Add, acc, item)?;
                Ok(())
            })?;
            Ok(total)
        }
        Builtin::Round => {
            let [kw_digits] = take_kwargs(name, kwargs, ["ndigits"])?;
            arity(name, &args, 1, 2)?;
            let mut args = args.into_iter();
            let x = args.next().unwrap_or(Value::None);
            let digits = args.next().or(kw_digits).unwrap_or(Value::None);
            round(&x, &digits)
        }
        Builtin::Int => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(v) => to_int(v),
            }
        }
        Builtin::Float => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(v) => to_float(v).map(Value::Float),
            }
        }
        Builtin::Bool => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        Builtin::Str => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(
                args.first().map(|v| v.to_string()).unwrap_or_default(),
            ))
        }
        Builtin::List | Builtin::Tuple => {
            arity(name, &args, 0, 1)?;
            let items = match args.into_iter().next() {
                None => Vec::new(),
                Some(v) => into_items(&interp.limits, v)?,
            };
            Ok(if builtin == Builtin::List {
                Value::List(items)
            } else {
                Value::Tuple(items)
            })
        }
        Builtin::Sorted => {
            let [reverse] = take_kwargs(name, kwargs, ["reverse"])?;
            arity(name, &args, 1, 1)?;
            let mut items = into_items(&interp.limits, args.into_iter().next().unwrap_or(Value::None))?;
            sort_values(&mut items, reverse.is_some_and(|r| r.truthy()))?;
            Ok(Value::List(items))
        }
        Builtin::Any | Builtin::All => {
            arity(name, &args, 1, 1)?;
            let want_any = builtin == Builtin::Any;
            let mut found = false;
            for_each(interp, args.into_iter().next().unwrap_or(Value::None), |item| {
                if !found && item.truthy() == want_any {
                    found = true;
                }
                Ok(())
            })?;
            Ok(Value::Bool(if want_any { found } else { !found }))
        }
        Builtin::Ceil => unary_math(name, &args, f64::ceil),
        Builtin::Floor => unary_math(name, &args, f64::floor),
        Builtin::Sqrt => unary_math(name, &args, f64::sqrt),
        Builtin::Exp => unary_math(name, &args, f64::exp),
        Builtin::Log => unary_math(name, &args, f64::ln),
        Builtin::Log10 => unary_math(name, &args, f64::log10),
        Builtin::Log2 => unary_math(name, &args, f64::log2),
        Builtin::Pow => {
            arity(name, &args, 2, 2)?;
            let mut args = args.into_iter();
            let base = args.next().unwrap_or(Value::None);
            let exp = args.next().unwrap_or(Value::None);
            ops::binary_op(&interp.limits, BinOp::Pow, base, exp)
        }
        Builtin::Mean | Builtin::Median | Builtin::Std | Builtin::Var => {
            arity(name, &args, 1, 1)?;
            let data = numeric_series(name, &interp.limits, args.into_iter().next().unwrap_or(Value::None))?;
            Ok(Value::Float(match builtin {
                Builtin::Mean => mean(&data),
                Builtin::Median => median(data),
                Builtin::Var => variance(&data),
                _ => variance(&data).sqrt(),
            }))
        }
        Builtin::Clip => {
            arity(name, &args, 3, 3)?;
            let (lo, hi) = (&args[1], &args[2]);
            map_elementwise(&args[0], |x| clip(x, lo, hi))
        }
        Builtin::IsNan => {
            arity(name, &args, 1, 1)?;
            map_elementwise(&args[0], |x| Ok(Value::Bool(number_arg(name, x)?.is_nan())))
        }
        Builtin::IsInf => {
            arity(name, &args, 1, 1)?;
            map_elementwise(&args[0], |x| Ok(Value::Bool(number_arg(name, x)?.is_infinite())))
        }
        Builtin::TimeTime => {
            arity(name, &args, 0, 0)?;
            let now = chrono::Utc::now();
            Ok(Value::Float(now.timestamp_micros() as f64 / 1e6))
        }
    }
}

fn extremum(
    interp: &mut Interpreter<'_>,
    want_max: bool,
    args: Vec<Value>,
    default: Option<Value>,
) -> RaiseResult<Value> {
    let name = if want_max { "max" } else { "min" };
    if args.is_empty() {
        return Err(Raise::type_error(format!(
            "{name} expected at least 1 argument, got 0"
        )));
    }
    let iterable = if args.len() == 1 {
        args.into_iter().next().unwrap_or(Value::None)
    } else {
        Value::List(args)
    };
    let mut best: Option<Value> = None;
    for_each(interp, iterable, |item| {
        let replace = match &best {
            None => true,
            Some(current) => {
                let ord = py_cmp(&item, current)?;
                if want_max {
                    ord == Ordering::Greater
                } else {
                    ord == Ordering::Less
                }
            }
        };
        if replace {
            best = Some(item);
        }
        Ok(())
    })?;
    best.or(default)
        .ok_or_else(|| Raise::value_error(format!("{name}() arg is an empty sequence")))
}

/// Stable sort with Python ordering; an incomparable pair fails the sort.
fn sort_values(items: &mut [Value], reverse: bool) -> RaiseResult<()> {
    let mut failure = None;
    items.sort_by(|a, b| {
        let (a, b) = if reverse { (b, a) } else { (a, b) };
        match py_cmp(a, b) {
            Ok(ord) => ord,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn round(x: &Value, digits: &Value) -> RaiseResult<Value> {
    match (x, digits) {
        (Value::Int(_) | Value::Bool(_), Value::None) => Ok(Value::Int(x.as_i64().unwrap_or(0))),
        (Value::Float(f), Value::None) => float_to_int(f.round_ties_even()),
        (Value::Int(_) | Value::Bool(_), d) => {
            let n = integer_arg(d)?;
            let i = x.as_i64().unwrap_or(0);
            if n >= 0 {
                return Ok(Value::Int(i));
            }
            let scale = 10f64.powi(i32::try_from(-n).unwrap_or(i32::MAX));
            float_to_int(((i as f64) / scale).round_ties_even() * scale)
        }
        (Value::Float(f), d) => {
            let n = integer_arg(d)?;
            if !f.is_finite() {
                return Ok(Value::Float(*f));
            }
            let n = i32::try_from(n.clamp(-308, 308)).unwrap_or(0);
            let scale = 10f64.powi(n);
            let scaled = f * scale;
            if !scaled.is_finite() {
                return Ok(Value::Float(*f));
            }
            Ok(Value::Float(scaled.round_ties_even() / scale))
        }
        (other, _) => Err(Raise::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> RaiseResult<Value> {
    if f.is_nan() {
        return Err(Raise::value_error("cannot convert float NaN to integer"));
    }
    if !f.is_finite() || f >= 9.223_372_036_854_776e18 || f < -9.223_372_036_854_776e18 {
        return Err(Raise::Error(
            "OverflowError",
            "cannot convert float infinity to integer".to_string(),
        ));
    }
    Ok(Value::Int(f as i64))
}

fn to_int(v: &Value) -> RaiseResult<Value> {
    match v {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(v.as_i64().unwrap_or(0))),
        Value::Float(f) => float_to_int(f.trunc()),
        Value::Str(s) => {
            let text: String = s.trim().chars().filter(|c| *c != '_').collect();
            text.parse::<i64>().map(Value::Int).map_err(|_| {
                Raise::value_error(format!("invalid literal for int() with base 10: {}", v.repr()))
            })
        }
        other => Err(Raise::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(v: &Value) -> RaiseResult<f64> {
    match v {
        v if v.is_number() => Ok(v.as_f64().unwrap_or(f64::NAN)),
        Value::Str(s) => {
            let text = s.trim().to_ascii_lowercase();
            match text.as_str() {
                "inf" | "+inf" | "infinity" | "+infinity" => Ok(f64::INFINITY),
                "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                "nan" | "+nan" | "-nan" => Ok(f64::NAN),
                t => t.parse::<f64>().map_err(|_| {
                    Raise::value_error(format!("could not convert string to float: {}", v.repr()))
                }),
            }
        }
        other => Err(Raise::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn map_elementwise(v: &Value, mut f: impl FnMut(&Value) -> RaiseResult<Value>) -> RaiseResult<Value> {
    match v {
        Value::List(items) | Value::Tuple(items) => {
            Ok(Value::List(items.iter().map(&mut f).collect::<RaiseResult<_>>()?))
        }
        scalar => f(scalar),
    }
}

fn unary_math(name: &str, args: &[Value], f: fn(f64) -> f64) -> RaiseResult<Value> {
    arity(name, args, 1, 1)?;
    map_elementwise(&args[0], |x| Ok(Value::Float(f(number_arg(name, x)?))))
}

fn clip(x: &Value, lo: &Value, hi: &Value) -> RaiseResult<Value> {
    for v in [x, lo, hi] {
        number_arg("clip", v)?;
    }
    let mut out = x.clone();
    if py_cmp(&out, lo)? == Ordering::Less {
        out = lo.clone();
    }
    if py_cmp(&out, hi)? == Ordering::Greater {
        out = hi.clone();
    }
    if [x, lo, hi].iter().any(|v| matches!(v, Value::Float(_))) {
        return Ok(Value::Float(out.as_f64().unwrap_or(f64::NAN)));
    }
    Ok(out)
}

fn numeric_series(name: &str, limits: &EvalLimits, v: Value) -> RaiseResult<Vec<f64>> {
    let items = match v {
        v if v.is_number() => vec![v],
        other => into_items(limits, other)?,
    };
    items.iter().map(|x| number_arg(name, x)).collect()
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    (0.0 + pairwise_sum(data)) / data.len() as f64
}

/// numpy's float reduction: eight running lanes over blocks of up to 128
/// elements, halving larger inputs on multiples of eight.
fn pairwise_sum(data: &[f64]) -> f64 {
    const BLOCK: usize = 128;
    let n = data.len();
    if n < 8 {
        data.iter().fold(-0.0, |acc, x| acc + x)
    } else if n <= BLOCK {
        let whole = n - n % 8;
        let mut lanes = [0.0; 8];
        lanes.copy_from_slice(&data[..8]);
        for chunk in data[8..whole].chunks_exact(8) {
            for (lane, x) in lanes.iter_mut().zip(chunk) {
                *lane += x;
            }
        }
        let mut total = ((lanes[0] + lanes[1]) + (lanes[2] + lanes[3]))
            + ((lanes[4] + lanes[5]) + (lanes[6] + lanes[7]));
        for x in &data[whole..] {
            total += x;
        }
        total
    } else {
        let mut half = n / 2;
        half -= half % 8;
        pairwise_sum(&data[..half]) + pairwise_sum(&data[half..])
    }
}

fn median(mut data: Vec<f64>) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    if data.iter().any(|x| x.is_nan()) {
        return f64::NAN;
    }
    data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = data.len() / 2;
    if data.len() % 2 == 0 {
        (data[mid - 1] + data[mid]) / 2.0
    } else {
        data[mid]
    }
}

/// Population variance (`ddof = 0`).
fn variance(data: &[f64]) -> f64 {
    let m = mean(data);
    mean(&data.iter().map(|x| (x - m) * (x - m)).collect::<Vec<_>>())
}

/// Call `receiver.name(args)`. Mutating methods change `receiver` in place.
pub(crate) fn call_method(
    limits: &EvalLimits,
    receiver: &mut Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> RaiseResult<Value> {
    if name != "sort" {
        no_kwargs(name, &kwargs)?;
    }
    let type_name = receiver.type_name();
    match receiver {
        Value::List(items) => list_method(limits, items, name, args, kwargs),
        Value::Tuple(items) => match name {
            "index" | "count" => list_method(limits, &mut items.clone(), name, args, kwargs),
            _ => Err(no_attribute(type_name, name)),
        },
        Value::Dict(map) => dict_method(limits, map, name, args),
        Value::Str(s) => str_method(limits, s, name, args),
        _ => Err(no_attribute(type_name, name)),
    }
}

fn no_attribute(type_name: &str, name: &str) -> Raise {
    Raise::Error(
        "AttributeError",
        format!("'{type_name}' object has no attribute '{name}'"),
    )
}

fn list_method(
    limits: &EvalLimits,
    items: &mut Vec<Value>,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> RaiseResult<Value> {
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            limits.check_len(items.len() + 1)?;
            let item = args.into_iter().next().unwrap_or(Value::None);
            let nested = is_container(&item);
            items.push(item);
            if nested {
                check_list(limits, items)?;
            }
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = into_items(limits, args.into_iter().next().unwrap_or(Value::None))?;
            limits.check_len(items.len() + extra.len())?;
            let nested = extra.iter().any(is_container);
            items.extend(extra);
            if nested {
                check_list(limits, items)?;
            }
            Ok(Value::None)
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let index = integer_arg(&args[0])?;
            limits.check_len(items.len() + 1)?;
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) } as usize;
            let item = args.into_iter().nth(1).unwrap_or(Value::None);
            let nested = is_container(&item);
            items.insert(at, item);
            if nested {
                check_list(limits, items)?;
            }
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            if items.is_empty() {
                return Err(Raise::Error("IndexError", "pop from empty list".into()));
            }
            let index = match args.first() {
                Some(v) => integer_arg(v)?,
                None => -1,
            };
            let len = items.len() as i64;
            let i = if index < 0 { index + len } else { index };
            if !(0..len).contains(&i) {
                return Err(Raise::Error("IndexError", "pop index out of range".into()));
            }
            Ok(items.remove(i as usize))
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            match items.iter().position(|v| py_eq(v, &args[0])) {
                Some(i) => {
                    items.remove(i);
                    Ok(Value::None)
                }
                None => Err(Raise::value_error("list.remove(x): x not in list")),
            }
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            items.clear();
            Ok(Value::None)
        }
        "index" => {
            arity(name, &args, 1, 1)?;
            items
                .iter()
                .position(|v| py_eq(v, &args[0]))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| Raise::value_error(format!("{} is not in list", args[0].repr())))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Int(
                items.iter().filter(|v| py_eq(v, &args[0])).count() as i64,
            ))
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::List(items.clone()))
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            items.reverse();
            Ok(Value::None)
        }
        "sort" => {
            arity(name, &args, 0, 0)?;
            let [reverse] = take_kwargs(name, kwargs, ["reverse"])?;
            sort_values(items, reverse.is_some_and(|r| r.truthy()))?;
            Ok(Value::None)
        }
        _ => Err(no_attribute("list", name)),
    }
}

fn check_list(limits: &EvalLimits, items: &mut Vec<Value>) -> RaiseResult<()> {
    let wrapped = Value::List(std::mem::take(items));
    let result = limits.check_value(&wrapped);
    if let Value::List(v) = wrapped {
        *items = v;
    }
    result
}

fn dict_method(
    limits: &EvalLimits,
    map: &mut std::collections::BTreeMap<String, Value>,
    name: &str,
    args: Vec<Value>,
) -> RaiseResult<Value> {
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let found = args[0].as_str().and_then(|k| map.get(k)).cloned();
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
        }
        "keys" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::List(map.keys().cloned().map(Value::Str).collect()))
        }
        "values" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::List(map.values().cloned().collect()))
        }
        "items" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::List(
                map.iter()
                    .map(|(k, v)| Value::Tuple(vec![Value::Str(k.clone()), v.clone()]))
                    .collect(),
            ))
        }
        "pop" => {
            arity(name, &args, 1, 2)?;
            let removed = args[0].as_str().and_then(|k| map.remove(k));
            match (removed, args.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ops::key_error(&args[0].to_string())),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let key = args[0].as_str().ok_or_else(|| {
                Raise::type_error(format!(
                    "dict keys must be strings, not {}",
                    args[0].type_name()
                ))
            })?;
            if let Some(v) = map.get(key) {
                return Ok(v.clone());
            }
            let value = args.get(1).cloned().unwrap_or(Value::None);
            limits.check_len(map.len() + 1)?;
            map.insert(key.to_string(), value.clone());
            Ok(value)
        }
        "update" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Dict(other) => {
                    limits.check_len(map.len() + other.len())?;
                    for (k, v) in other {
                        map.insert(k.clone(), v.clone());
                    }
                    let wrapped = Value::Dict(std::mem::take(map));
                    let result = limits.check_value(&wrapped);
                    if let Value::Dict(m) = wrapped {
                        *map = m;
                    }
                    result.map(|_| Value::None)
                }
                other => Err(Raise::type_error(format!(
                    "'{}' object is not a mapping",
                    other.type_name()
                ))),
            }
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            map.clear();
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Dict(map.clone()))
        }
        _ => Err(no_attribute("dict", name)),
    }
}

fn str_arg<'a>(name: &str, v: &'a Value) -> RaiseResult<&'a str> {
    v.as_str().ok_or_else(|| {
        Raise::type_error(format!(
            "{name}() argument must be str, not {}",
            v.type_name()
        ))
    })
}

fn str_method(limits: &EvalLimits, s: &mut String, name: &str, args: Vec<Value>) -> RaiseResult<Value> {
    let strip_chars = |args: &[Value]| -> RaiseResult<Option<Vec<char>>> {
        match args.first() {
            None | Some(Value::None) => Ok(None),
            Some(v) => Ok(Some(str_arg(name, v)?.chars().collect())),
        }
    };
    match name {
        "upper" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        "lower" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let chars = strip_chars(&args)?;
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(Value::Str(out.to_string()))
        }
        "split" => {
            arity(name, &args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::from).collect(),
                Some(sep) => {
                    let sep = str_arg(name, sep)?;
                    if sep.is_empty() {
                        return Err(Raise::value_error("empty separator"));
                    }
                    s.split(sep).map(Value::from).collect()
                }
            };
            Ok(Value::List(parts))
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let items = into_items(limits, args.into_iter().next().unwrap_or(Value::None))?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(p) => parts.push(p.as_str()),
                    other => {
                        return Err(Raise::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            let total: usize = parts.iter().map(|p| p.len()).sum::<usize>()
                + s.len() * parts.len().saturating_sub(1);
            limits.check_len(total)?;
            Ok(Value::Str(parts.join(s)))
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let affix = str_arg(name, &args[0])?;
            Ok(Value::Bool(if name == "startswith" {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            }))
        }
        "replace" => {
            arity(name, &args, 2, 2)?;
            let (old, new) = (str_arg(name, &args[0])?, str_arg(name, &args[1])?);
            let out = s.replace(old, new);
            limits.check_len(out.len())?;
            Ok(Value::Str(out))
        }
        "find" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            Ok(Value::Int(match s.find(needle) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            }))
        }
        "format" => {
            let out = str_format(limits, s, &args)?;
            limits.check_len(out.len())?;
            Ok(Value::Str(out))
        }
        _ => Err(no_attribute("str", name)),
    }
}
