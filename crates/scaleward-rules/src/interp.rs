//! Tree-walking interpreter.
//!
//! Runs synchronously on the evaluation thread. Every statement and loop
//! iteration counts as a step; every `check_interval` steps the deadline
//! and the cancel flag are consulted so a runaway rule unwinds promptly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::ast::{BinOp, Expr, Index, Stmt, StmtKind, Target, UnaryOp};
use crate::builtins::{self, MUTATING_METHODS};
use crate::error::{EvalResult, Raise, RaiseResult};
use crate::limits::{EvalLimits, is_container};
use crate::ops::{self, into_items};
use crate::value::{Bindings, Builtin, Callable, Module, Value, range_item, range_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

pub(crate) struct Interpreter<'a> {
    scope: HashMap<String, Value>,
    pub(crate) limits: EvalLimits,
    deadline: Option<Instant>,
    cancel: &'a AtomicBool,
    steps: u64,
    output: &'a mut dyn FnMut(String),
}

fn name_error(name: &str) -> Raise {
    Raise::Error("NameError", format!("name '{name}' is not defined"))
}

/// Walk `keys` from the variable `root` down to the addressed element.
fn resolve_mut<'s>(
    scope: &'s mut HashMap<String, Value>,
    root: &str,
    keys: &[Value],
) -> RaiseResult<&'s mut Value> {
    let mut current = scope.get_mut(root).ok_or_else(|| name_error(root))?;
    for key in keys {
        current = ops::item_mut(current, key)?;
    }
    Ok(current)
}

/// `x`, `x[i]`, `x[i][j]`, ... : expressions a mutating method can act on.
fn is_place(expr: &Expr) -> bool {
    match expr {
        Expr::Name(_) => true,
        Expr::Subscript(obj, index) => matches!(**index, Index::Single(_)) && is_place(obj),
        _ => false,
    }
}

fn module_attr(module: Module, name: &str) -> RaiseResult<Value> {
    match (module, name) {
        (Module::Time, "time") => Ok(Value::Callable(Callable::Builtin(Builtin::TimeTime))),
        (Module::Time, other) => Err(Raise::Error(
            "AttributeError",
            format!("module 'time' has no attribute '{other}'"),
        )),
    }
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        limits: EvalLimits,
        deadline: Option<Instant>,
        cancel: &'a AtomicBool,
        output: &'a mut dyn FnMut(String),
    ) -> Self {
        let mut scope = HashMap::new();
        for (name, builtin) in Builtin::GLOBALS {
            scope.insert(name.to_string(), Value::Callable(Callable::Builtin(*builtin)));
        }
        scope.insert("time".to_string(), Value::Module(Module::Time));
        scope.insert("pi".to_string(), Value::Float(std::f64::consts::PI));
        scope.insert("e".to_string(), Value::Float(std::f64::consts::E));
        scope.insert("inf".to_string(), Value::Float(f64::INFINITY));
        scope.insert("nan".to_string(), Value::Float(f64::NAN));
        Self {
            scope,
            limits,
            deadline,
            cancel,
            steps: 0,
            output,
        }
    }

    pub(crate) fn bind(&mut self, bindings: Bindings) {
        self.scope.extend(bindings);
    }

    pub(crate) fn run(&mut self, program: &[Stmt]) -> EvalResult<()> {
        self.exec_block(program).map(|_| ())
    }

    /// Requested names that the rule left bound to data.
    pub(crate) fn into_outputs(mut self, names: &[&str]) -> Bindings {
        names
            .iter()
            .filter_map(|name| {
                let value = self.scope.remove(*name)?;
                match value {
                    Value::Callable(Callable::Builtin(_)) | Value::Module(_) => None,
                    v => Some((name.to_string(), v)),
                }
            })
            .collect()
    }

    pub(crate) fn tick(&mut self) -> RaiseResult<()> {
        self.steps += 1;
        if self.steps % self.limits.check_interval() == 0 {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Raise::Interrupted);
            }
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Raise::Interrupted);
            }
        }
        Ok(())
    }

    pub(crate) fn emit(&mut self, line: String) {
        (self.output)(line);
    }

    fn lookup(&self, name: &str) -> RaiseResult<Value> {
        self.scope.get(name).cloned().ok_or_else(|| name_error(name))
    }

    // ── Statements ─────────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            let flow = self.exec(stmt)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        let line = stmt.line;
        let at = move |r: Raise| r.at(line);
        self.tick().map_err(at)?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr).map_err(at)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value).map_err(at)?;
                if let [target] = targets.as_slice() {
                    self.assign(target, value).map_err(at)?;
                } else {
                    for target in targets {
                        self.assign(target, value.clone()).map_err(at)?;
                    }
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.aug_assign(target, *op, value).map_err(at)?;
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test).map_err(at)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter).map_err(at)?;
                if let Value::Range { start, step, .. } = iterable {
                    for k in 0..range_span(&iterable) {
                        self.tick().map_err(at)?;
                        self.assign(target, Value::Int(range_item(start, step, k)))
                            .map_err(at)?;
                        if self.exec_block(body)? == Flow::Break {
                            return Ok(Flow::Normal);
                        }
                    }
                } else {
                    for item in into_items(&self.limits, iterable).map_err(at)? {
                        self.tick().map_err(at)?;
                        self.assign(target, item).map_err(at)?;
                        if self.exec_block(body)? == Flow::Break {
                            return Ok(Flow::Normal);
                        }
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { test, body, orelse } => loop {
                self.tick().map_err(at)?;
                if !self.eval(test).map_err(at)?.truthy() {
                    return self.exec_block(orelse);
                }
                if self.exec_block(body)? == Flow::Break {
                    return Ok(Flow::Normal);
                }
            },
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    /// Root variable and evaluated keys of a subscript target.
    fn target_path(&mut self, target: &Target) -> RaiseResult<(String, Vec<Value>)> {
        match target {
            Target::Name(name) => Ok((name.clone(), Vec::new())),
            Target::Subscript { obj, index } => {
                let (root, mut keys) = self.target_path(obj)?;
                keys.push(self.eval(index)?);
                Ok((root, keys))
            }
            Target::Unpack(_) => Err(Raise::type_error("cannot subscript a tuple target")),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> RaiseResult<()> {
        match target {
            Target::Name(name) => {
                self.scope.insert(name.clone(), value);
                Ok(())
            }
            Target::Subscript { obj, index } => {
                let (root, keys) = self.target_path(obj)?;
                let key = self.eval(index)?;
                self.store(&root, &keys, &key, value)
            }
            Target::Unpack(targets) => {
                let items = into_items(&self.limits, value)?;
                if items.len() != targets.len() {
                    return Err(Raise::value_error(if items.len() < targets.len() {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", targets.len())
                    }));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    /// `root[keys..][key] = value`, then re-check what grew.
    fn store(&mut self, root: &str, keys: &[Value], key: &Value, value: Value) -> RaiseResult<()> {
        let nested = is_container(&value);
        let container = resolve_mut(&mut self.scope, root, keys)?;
        ops::setitem(container, key, value)?;
        self.limits.check_value(container)?;
        if nested && !keys.is_empty() {
            self.check_root(root)?;
        }
        Ok(())
    }

    fn check_root(&self, root: &str) -> RaiseResult<()> {
        match self.scope.get(root) {
            Some(v) => self.limits.check_value(v),
            None => Ok(()),
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> RaiseResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let result = ops::binary_op(&self.limits, op, current, rhs)?;
                self.scope.insert(name.clone(), result);
                Ok(())
            }
            Target::Subscript { obj, index } => {
                let (root, keys) = self.target_path(obj)?;
                let key = self.eval(index)?;
                let current = ops::getitem(resolve_mut(&mut self.scope, &root, &keys)?, &key)?;
                let rhs = self.eval(value)?;
                let result = ops::binary_op(&self.limits, op, current, rhs)?;
                self.store(&root, &keys, &key, result)
            }
            Target::Unpack(_) => Err(Raise::type_error(
                "illegal expression for augmented assignment",
            )),
        }
    }

    // ── Expressions ────────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> RaiseResult<Value> {
        match expr {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let v = Value::List(self.eval_all(items)?);
                self.limits.check_value(&v)?;
                Ok(v)
            }
            Expr::Tuple(items) => {
                let v = Value::Tuple(self.eval_all(items)?);
                self.limits.check_value(&v)?;
                Ok(v)
            }
            Expr::Dict(pairs) => {
                let mut map = std::collections::BTreeMap::new();
                for (k, v) in pairs {
                    let key = match self.eval(k)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(Raise::type_error(format!(
                                "dict keys must be strings, not {}",
                                other.type_name()
                            )));
                        }
                    };
                    map.insert(key, self.eval(v)?);
                }
                let v = Value::Dict(map);
                self.limits.check_value(&v)?;
                Ok(v)
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => ops::negate(v),
                    UnaryOp::Pos => ops::positive(v),
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                }
            }
            Expr::Binary(lhs, op, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                ops::binary_op(&self.limits, *op, a, b)
            }
            Expr::And(lhs, rhs) => {
                let a = self.eval(lhs)?;
                if !a.truthy() {
                    return Ok(a);
                }
                self.eval(rhs)
            }
            Expr::Or(lhs, rhs) => {
                let a = self.eval(lhs)?;
                if a.truthy() {
                    return Ok(a);
                }
                self.eval(rhs)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, rhs) in rest {
                    let right = self.eval(rhs)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                if let Expr::Attribute(obj, method) = func.as_ref() {
                    return self.call_method(obj, method, args, kwargs);
                }
                let callee = self.eval(func)?;
                let args = self.eval_all(args)?;
                let kwargs = self.eval_kwargs(kwargs)?;
                self.call_value(callee, args, kwargs)
            }
            Expr::Attribute(obj, name) => match self.eval(obj)? {
                Value::Module(m) => module_attr(m, name),
                other => Err(Raise::Error(
                    "AttributeError",
                    format!(
                        "'{}' object attribute '{name}' can only be called",
                        other.type_name()
                    ),
                )),
            },
            Expr::Subscript(obj, index) => {
                let value = self.eval(obj)?;
                match index.as_ref() {
                    Index::Single(key) => {
                        let key = self.eval(key)?;
                        ops::getitem(&value, &key)
                    }
                    Index::Slice(lower, upper, step) => {
                        let lower = self.eval_opt(lower)?;
                        let upper = self.eval_opt(upper)?;
                        let step = self.eval_opt(step)?;
                        ops::slice(&value, lower, upper, step)
                    }
                }
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> RaiseResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_opt(&mut self, expr: &Option<Expr>) -> RaiseResult<Option<Value>> {
        expr.as_ref().map(|e| self.eval(e)).transpose()
    }

    fn eval_kwargs(&mut self, kwargs: &[(String, Expr)]) -> RaiseResult<Vec<(String, Value)>> {
        kwargs
            .iter()
            .map(|(k, e)| Ok((k.clone(), self.eval(e)?)))
            .collect()
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RaiseResult<Value> {
        match callee {
            Value::Callable(Callable::Builtin(b)) => builtins::call_builtin(self, b, args, kwargs),
            Value::Callable(Callable::Constant(v)) => {
                if !args.is_empty() || !kwargs.is_empty() {
                    return Err(Raise::type_error(format!(
                        "function takes 0 arguments ({} given)",
                        args.len() + kwargs.len()
                    )));
                }
                Ok(*v)
            }
            other => Err(Raise::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    /// `obj.method(args)`. Mutating methods on a variable or one of its
    /// elements change it in place; anything else acts on a temporary.
    fn call_method(
        &mut self,
        obj: &Expr,
        method: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> RaiseResult<Value> {
        if MUTATING_METHODS.contains(&method) && is_place(obj) {
            let (root, keys) = self.place_path(obj)?;
            let args = self.eval_all(args)?;
            let kwargs = self.eval_kwargs(kwargs)?;
            let nested = args.iter().any(is_container);
            let receiver = resolve_mut(&mut self.scope, &root, &keys)?;
            let result = builtins::call_method(&self.limits, receiver, method, args, kwargs)?;
            if nested && !keys.is_empty() {
                self.check_root(&root)?;
            }
            return Ok(result);
        }

        let mut receiver = self.eval(obj)?;
        if let Value::Module(m) = receiver {
            let callee = module_attr(m, method)?;
            let args = self.eval_all(args)?;
            let kwargs = self.eval_kwargs(kwargs)?;
            return self.call_value(callee, args, kwargs);
        }
        let args = self.eval_all(args)?;
        let kwargs = self.eval_kwargs(kwargs)?;
        builtins::call_method(&self.limits, &mut receiver, method, args, kwargs)
    }

    fn place_path(&mut self, expr: &Expr) -> RaiseResult<(String, Vec<Value>)> {
        match expr {
            Expr::Name(name) => Ok((name.clone(), Vec::new())),
            Expr::Subscript(obj, index) => match index.as_ref() {
                Index::Single(key) => {
                    let (root, mut keys) = self.place_path(obj)?;
                    keys.push(self.eval(key)?);
                    Ok((root, keys))
                }
                Index::Slice(..) => Err(Raise::type_error("cannot modify a slice in place")),
            },
            _ => Err(Raise::type_error("expression cannot be modified in place")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::parser::parse;

    fn run_with(src: &str, inputs: Bindings, outputs: &[&str]) -> (EvalResult<Bindings>, Vec<String>) {
        let cancel = AtomicBool::new(false);
        let mut lines = Vec::new();
        let mut sink = |line: String| lines.push(line);
        let result = parse(src).and_then(|program| {
            let mut interp = Interpreter::new(EvalLimits::with_defaults(), None, &cancel, &mut sink);
            interp.bind(inputs);
            interp.run(&program)?;
            Ok(interp.into_outputs(outputs))
        });
        (result, lines)
    }

    fn run(src: &str, outputs: &[&str]) -> Bindings {
        run_with(src, Bindings::new(), outputs).0.unwrap()
    }

    fn get(src: &str, name: &str) -> Value {
        run(src, &[name]).remove(name).unwrap()
    }

    #[test]
    fn arithmetic_and_loops() {
        let out = run("y = 0\nfor i in range(10000):\n  y = y + i\nx = 5", &["x", "y"]);
        assert_eq!(out.get("x"), Some(&Value::Int(5)));
        assert_eq!(out.get("y"), Some(&Value::Int(49995000)));
    }

    #[test]
    fn inputs_are_visible() {
        let mut inputs = Bindings::new();
        inputs.insert("y".into(), Value::Int(10));
        let (out, _) = run_with("for i in range(101):\n  y = y + i", inputs, &["y"]);
        assert_eq!(out.unwrap().get("y"), Some(&Value::Int(5060)));
    }

    #[test]
    fn control_flow() {
        let src = "\
total = 0
i = 0
while True:
    i += 1
    if i % 2 == 0:
        continue
    if i > 9:
        break
    total += i
else:
    total = -1
";
        assert_eq!(get(src, "total"), Value::Int(25));
        assert_eq!(
            get("found = 0\nfor x in [1, 2]:\n    pass\nelse:\n    found = 1\n", "found"),
            Value::Int(1)
        );
    }

    #[test]
    fn short_circuit_returns_operand() {
        assert_eq!(get("x = 0 or 'a'", "x"), Value::from("a"));
        assert_eq!(get("x = [] and undefined_name", "x"), Value::List(vec![]));
        assert_eq!(get("x = 1 < 2 < 3", "x"), Value::Bool(true));
        assert_eq!(get("x = 1 < 3 < 2", "x"), Value::Bool(false));
        assert_eq!(get("x = 'a' if None else 'b'", "x"), Value::from("b"));
    }

    #[test]
    fn nested_mutation() {
        let src = "\
d = {'nodes': [], 'count': 0}
d['nodes'].append('n1')
d['nodes'].append('n2')
d['count'] += len(d['nodes'])
first = d['nodes'].pop(0)
";
        let out = run(src, &["d", "first"]);
        assert_eq!(out["first"], Value::from("n1"));
        assert_eq!(out["d"].to_string(), "{'count': 2, 'nodes': ['n2']}");
    }

    #[test]
    fn unpacking_and_subscript_assignment() {
        let out = run("a, b = 1, 2\nb, a = a, b\nl = [0, 0]\nl[-1] = 9", &["a", "b", "l"]);
        assert_eq!(out["a"], Value::Int(2));
        assert_eq!(out["b"], Value::Int(1));
        assert_eq!(out["l"], Value::List(vec![Value::Int(0), Value::Int(9)]));
        let (err, _) = run_with("a, b = [1, 2, 3]", Bindings::new(), &[]);
        assert!(matches!(err, Err(EvalError::Runtime { line: 1, .. })));
    }

    #[test]
    fn builtins_and_modules() {
        assert_eq!(get("x = max([3, 7, 5])", "x"), Value::Int(7));
        assert_eq!(get("x = min(4, 2, 8)", "x"), Value::Int(2));
        assert_eq!(get("x = sum(range(5))", "x"), Value::Int(10));
        assert_eq!(get("x = round(mean([1, 2, 4]), 2)", "x"), Value::Float(2.33));
        assert_eq!(get("x = sorted([3, 1, 2], reverse=True)", "x").to_string(), "[3, 2, 1]");
        assert!(matches!(get("t = time.time()", "t"), Value::Float(t) if t > 1.6e9));
        assert_eq!(get("x = int(ceil(7 / 2))", "x"), Value::Int(4));
    }

    #[test]
    fn print_goes_to_output() {
        let (_, lines) = run_with("print('nodes:', 3, sep=' ')\nprint(1.5)", Bindings::new(), &[]);
        assert_eq!(lines, vec!["nodes: 3".to_string(), "1.5".to_string()]);
    }

    #[test]
    fn constant_callables() {
        let mut inputs = Bindings::new();
        inputs.insert(
            "advice".into(),
            Value::Callable(Callable::Constant(Box::new(Value::Int(4)))),
        );
        let (out, _) = run_with("x = advice()", inputs, &["x"]);
        assert_eq!(out.unwrap()["x"], Value::Int(4));
    }

    #[test]
    fn runtime_errors_carry_line_numbers() {
        let (err, _) = run_with("x = 1\ny = x / 0\n", Bindings::new(), &[]);
        match err {
            Err(EvalError::Runtime { line, message }) => {
                assert_eq!(line, 2);
                assert!(message.starts_with("ZeroDivisionError"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let (err, _) = run_with("y = undefined + 1", Bindings::new(), &[]);
        assert!(matches!(err, Err(EvalError::Runtime { ref message, .. }) if message.contains("NameError")));
    }

    #[test]
    fn unrelated_outputs_are_absent() {
        assert!(run("x = 5", &["z"]).is_empty());
        assert!(run("x = 5", &["print"]).is_empty());
    }

    #[test]
    fn memory_bombs_hit_limits() {
        let (err, _) = run_with(
            "x = [0] * 1000\ny = []\nfor i in range(2000):\n    y.append(x)\n",
            Bindings::new(),
            &[],
        );
        assert!(matches!(err, Err(EvalError::Resource { line: 4, .. })));
        let (err, _) = run_with("s = 'a' * 2000000", Bindings::new(), &[]);
        assert!(matches!(err, Err(EvalError::Resource { .. })));
    }

    #[test]
    fn cancel_flag_interrupts() {
        let cancel = AtomicBool::new(true);
        let mut sink = |_line: String| {};
        let program = parse("while True:\n    pass\n").unwrap();
        let mut interp = Interpreter::new(EvalLimits::with_defaults(), None, &cancel, &mut sink);
        assert_eq!(interp.run(&program), Err(EvalError::Interrupted));
    }

    #[test]
    fn deadline_interrupts() {
        let cancel = AtomicBool::new(false);
        let mut sink = |_line: String| {};
        let program = parse("while True:\n    pass\n").unwrap();
        let deadline = Instant::now() + std::time::Duration::from_millis(20);
        let mut interp =
            Interpreter::new(EvalLimits::with_defaults(), Some(deadline), &cancel, &mut sink);
        assert_eq!(interp.run(&program), Err(EvalError::Interrupted));
    }
}
