//! Recursive-descent parser.
//!
//! Constructs outside the language (function and class definitions,
//! exception handling, comprehensions, `assert`, `del`, `raise`, ...) are
//! rejected here, so a rule containing one never starts executing.

use crate::ast::*;
use crate::error::{EvalError, EvalResult};
use crate::lexer::{Tok, Token, tokenize};
use crate::value::Value;

/// Keywords that name a construct the language forbids.
const FORBIDDEN: &[(&str, &str)] = &[
    ("def", "function definitions"),
    ("lambda", "lambda expressions"),
    ("class", "class definitions"),
    ("try", "exception handling"),
    ("except", "exception handling"),
    ("finally", "exception handling"),
    ("raise", "raise statements"),
    ("assert", "assert statements"),
    ("del", "del statements"),
    ("import", "imports"),
    ("from", "imports"),
    ("with", "with statements"),
    ("return", "return statements"),
    ("yield", "generators"),
    ("global", "global declarations"),
    ("nonlocal", "nonlocal declarations"),
    ("async", "coroutines"),
    ("await", "coroutines"),
];

const RESERVED: &[&str] = &[
    "if", "elif", "else", "for", "in", "while", "break", "continue", "pass", "and", "or", "not",
    "is", "True", "False", "None",
];

const MAX_NESTING: usize = 100;

/// Parse rule text into statements.
pub(crate) fn parse(source: &str) -> EvalResult<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        loops: 0,
    };
    parser.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// Enclosing loop bodies; `break`/`continue` need at least one.
    loops: usize,
}

fn forbidden(name: &str) -> Option<&'static str> {
    FORBIDDEN.iter().find(|(k, _)| *k == name).map(|(_, what)| *what)
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, message: impl Into<String>) -> EvalResult<T> {
        Err(EvalError::syntax(self.line(), message))
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> EvalResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{op}'"))
        }
    }

    fn enter(&mut self) -> EvalResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return self.error("rule is nested too deeply");
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn reject_forbidden(&self) -> EvalResult<()> {
        if let Tok::Name(name) = self.peek()
            && let Some(what) = forbidden(name)
        {
            return self.error(format!("{what} are not allowed (`{name}`)"));
        }
        Ok(())
    }

    fn reject_comprehension(&self) -> EvalResult<()> {
        if self.is_kw("for") {
            return self.error("comprehensions are not allowed");
        }
        Ok(())
    }

    // ── Statements ─────────────────────────────────────────────────

    fn program(&mut self) -> EvalResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                _ => stmts.extend(self.statement()?),
            }
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> EvalResult<Vec<Stmt>> {
        self.reject_forbidden()?;
        match self.peek() {
            Tok::Indent => self.error("unexpected indent"),
            Tok::Dedent => self.error("unexpected unindent"),
            Tok::Name(n) if n == "if" => Ok(vec![self.if_stmt()?]),
            Tok::Name(n) if n == "for" => Ok(vec![self.for_stmt()?]),
            Tok::Name(n) if n == "while" => Ok(vec![self.while_stmt()?]),
            Tok::Name(n) if n == "elif" || n == "else" => self.error("invalid syntax"),
            _ => self.simple_line(),
        }
    }

    /// One or more `;`-separated simple statements ending the line.
    fn simple_line(&mut self) -> EvalResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.simple()?);
        }
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(stmts)
            }
            Tok::Eof | Tok::Dedent => Ok(stmts),
            _ => self.error("invalid syntax"),
        }
    }

    fn simple(&mut self) -> EvalResult<Stmt> {
        self.reject_forbidden()?;
        let line = self.line();
        let kind = if self.is_kw("break") || self.is_kw("continue") {
            if self.loops == 0 {
                let keyword = if self.is_kw("break") { "break" } else { "continue" };
                return self.error(format!("'{keyword}' outside loop"));
            }
            if self.eat_kw("break") {
                StmtKind::Break
            } else {
                self.advance();
                StmtKind::Continue
            }
        } else if self.eat_kw("pass") {
            StmtKind::Pass
        } else {
            let expr = self.testlist()?;
            if self.is_op("=") {
                let mut targets = vec![self.to_target(expr)?];
                let value = loop {
                    self.expect_op("=")?;
                    let rhs = self.testlist()?;
                    if self.is_op("=") {
                        targets.push(self.to_target(rhs)?);
                    } else {
                        break rhs;
                    }
                };
                StmtKind::Assign { targets, value }
            } else if let Some(op) = self.aug_op() {
                self.pos += 1;
                let target = self.to_target(expr)?;
                if matches!(target, Target::Unpack(_)) {
                    return self.error("illegal expression for augmented assignment");
                }
                let value = self.testlist()?;
                StmtKind::AugAssign { target, op, value }
            } else {
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { line, kind })
    }

    fn aug_op(&self) -> Option<BinOp> {
        match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        }
    }

    fn suite(&mut self) -> EvalResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.simple_line();
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return self.error("expected an indented block");
        }
        self.pos += 1;
        self.enter()?;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => self.pos += 1,
                _ => body.extend(self.statement()?),
            }
        }
        self.leave();
        Ok(body)
    }

    fn loop_body(&mut self) -> EvalResult<Vec<Stmt>> {
        self.loops += 1;
        let body = self.suite();
        self.loops -= 1;
        body
    }

    fn if_stmt(&mut self) -> EvalResult<Stmt> {
        let line = self.line();
        self.advance();
        let mut branches = Vec::new();
        let test = self.test()?;
        branches.push((test, self.suite()?));
        let mut orelse = Vec::new();
        loop {
            if self.eat_kw("elif") {
                let test = self.test()?;
                branches.push((test, self.suite()?));
            } else if self.eat_kw("else") {
                orelse = self.suite()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            line,
            kind: StmtKind::If { branches, orelse },
        })
    }

    fn for_stmt(&mut self) -> EvalResult<Stmt> {
        let line = self.line();
        self.advance();
        let first = self.atom_expr()?;
        let target_expr = if self.is_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.is_kw("in") {
                    break;
                }
                items.push(self.atom_expr()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        let target = self.to_target(target_expr)?;
        if !self.eat_kw("in") {
            return self.error("expected 'in'");
        }
        let iter = self.testlist()?;
        let body = self.loop_body()?;
        let orelse = if self.eat_kw("else") {
            self.suite()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn while_stmt(&mut self) -> EvalResult<Stmt> {
        let line = self.line();
        self.advance();
        let test = self.test()?;
        let body = self.loop_body()?;
        let orelse = if self.eat_kw("else") {
            self.suite()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::While { test, body, orelse },
        })
    }

    fn to_target(&self, expr: Expr) -> EvalResult<Target> {
        match expr {
            Expr::Name(name) => {
                if RESERVED.contains(&name.as_str()) {
                    return self.error(format!("cannot assign to {name}"));
                }
                Ok(Target::Name(name))
            }
            Expr::Subscript(obj, index) => match *index {
                Index::Single(index) => Ok(Target::Subscript {
                    obj: Box::new(self.to_target(*obj)?),
                    index,
                }),
                Index::Slice(..) => self.error("slice assignment is not supported"),
            },
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Unpack(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<EvalResult<_>>()?,
            )),
            Expr::Attribute(..) => self.error("cannot assign to attribute"),
            _ => self.error("cannot assign to expression"),
        }
    }

    // ── Expressions ────────────────────────────────────────────────

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) => true,
            Tok::Name(n) => {
                !RESERVED.contains(&n.as_str())
                    || matches!(n.as_str(), "not" | "None" | "True" | "False")
            }
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    /// `test (',' test)* [',']`: a bare comma builds a tuple.
    fn testlist(&mut self) -> EvalResult<Expr> {
        let first = self.test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> EvalResult<Expr> {
        self.enter()?;
        self.reject_forbidden()?;
        let body = self.or_test()?;
        let result = if self.eat_kw("if") {
            let test = self.or_test()?;
            if !self.eat_kw("else") {
                return self.error("expected 'else' in conditional expression");
            }
            let orelse = self.test()?;
            Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            }
        } else {
            body
        };
        self.leave();
        Ok(result)
    }

    fn or_test(&mut self) -> EvalResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> EvalResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> EvalResult<Expr> {
        if self.eat_kw("not") {
            self.enter()?;
            let operand = self.not_test()?;
            self.leave();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> EvalResult<Expr> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), ops))
        }
    }

    fn arith(&mut self) -> EvalResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> EvalResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> EvalResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.factor()?;
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> EvalResult<Expr> {
        let base = self.atom_expr()?;
        if self.eat_op("**") {
            self.enter()?;
            let exponent = self.factor()?;
            self.leave();
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom_expr(&mut self) -> EvalResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                match self.advance() {
                    Tok::Name(attr) => expr = Expr::Attribute(Box::new(expr), attr),
                    _ => return self.error("expected attribute name"),
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> EvalResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.eat_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return self.error("argument unpacking is not supported");
            }
            let keyword = match (self.peek(), self.peek_at(1)) {
                (Tok::Name(name), Tok::Op("=")) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.pos += 2;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return self.error(format!("keyword argument repeated: {name}"));
                }
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return self.error("positional argument follows keyword argument");
                }
                args.push(self.test()?);
                self.reject_comprehension()?;
            }
            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> EvalResult<Index> {
        let lower = if self.is_op(":") {
            None
        } else {
            Some(self.test()?)
        };
        if !self.eat_op(":") {
            self.expect_op("]")?;
            return match lower {
                Some(e) => Ok(Index::Single(e)),
                None => self.error("invalid subscript"),
            };
        }
        let upper = if self.is_op(":") || self.is_op("]") {
            None
        } else {
            Some(self.test()?)
        };
        let step = if self.eat_op(":") && !self.is_op("]") {
            Some(self.test()?)
        } else {
            None
        };
        self.expect_op("]")?;
        Ok(Index::Slice(lower, upper, step))
    }

    fn atom(&mut self) -> EvalResult<Expr> {
        self.reject_forbidden()?;
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Const(Value::Int(i))),
            Tok::Float(f) => Ok(Expr::Const(Value::Float(f))),
            Tok::Str(s) => {
                let mut s = s;
                while let Tok::Str(next) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Const(Value::Str(s)))
            }
            Tok::Name(name) => match name.as_str() {
                "True" => Ok(Expr::Const(Value::Bool(true))),
                "False" => Ok(Expr::Const(Value::Bool(false))),
                "None" => Ok(Expr::Const(Value::None)),
                n if RESERVED.contains(&n) => {
                    self.pos -= 1;
                    self.error("invalid syntax")
                }
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => self.paren(),
            Tok::Op("[") => self.list(),
            Tok::Op("{") => self.dict(),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                self.error("invalid syntax")
            }
        }
    }

    fn paren(&mut self) -> EvalResult<Expr> {
        self.enter()?;
        if self.eat_op(")") {
            self.leave();
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.test()?;
        self.reject_comprehension()?;
        let expr = if self.is_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.is_op(")") {
                    break;
                }
                items.push(self.test()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        self.expect_op(")")?;
        self.leave();
        Ok(expr)
    }

    fn list(&mut self) -> EvalResult<Expr> {
        self.enter()?;
        let mut items = Vec::new();
        while !self.eat_op("]") {
            items.push(self.test()?);
            self.reject_comprehension()?;
            if !self.eat_op(",") {
                self.expect_op("]")?;
                break;
            }
        }
        self.leave();
        Ok(Expr::List(items))
    }

    fn dict(&mut self) -> EvalResult<Expr> {
        self.enter()?;
        let mut items = Vec::new();
        while !self.eat_op("}") {
            let key = self.test()?;
            if !self.eat_op(":") {
                return self.error("set literals are not supported");
            }
            let value = self.test()?;
            self.reject_comprehension()?;
            items.push((key, value));
            if !self.eat_op(",") {
                self.expect_op("}")?;
                break;
            }
        }
        self.leave();
        Ok(Expr::Dict(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax_message(src: &str) -> String {
        match parse(src) {
            Err(EvalError::Syntax { message, .. }) => message,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn parses_control_flow() {
        let src = "y = 0\nfor i in range(3):\n    if i % 2 == 0:\n        y += i\n    elif i > 5:\n        pass\n    else:\n        continue\nwhile y < 10: y = y * 2\n";
        let stmts = parse(src).unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[1].kind, StmtKind::For { .. }));
        assert!(matches!(stmts[2].kind, StmtKind::While { .. }));
    }

    #[test]
    fn chained_assignment_and_unpacking() {
        let stmts = parse("a = b = 1\nx, y = 1, 2\n").unwrap();
        match &stmts[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        match &stmts[1].kind {
            StmtKind::Assign { targets, .. } => {
                assert!(matches!(&targets[0], Target::Unpack(t) if t.len() == 2))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let stmts = parse("x = -2 ** 2").unwrap();
        match &stmts[0].kind {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(value, Expr::Unary(UnaryOp::Neg, inner) if matches!(**inner, Expr::Binary(_, BinOp::Pow, _))))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn statement_line_numbers() {
        let stmts = parse("a = 1\n\nb = 2\n").unwrap();
        assert_eq!(stmts[0].line, 1);
        assert_eq!(stmts[1].line, 3);
    }

    #[test]
    fn rejects_function_definitions() {
        assert!(syntax_message("def f():\n    return 1\n").contains("function definitions"));
        assert!(syntax_message("f = lambda x: x").contains("lambda"));
    }

    #[test]
    fn rejects_exception_handling_and_friends() {
        assert!(syntax_message("try:\n    x = 1\nexcept:\n    pass\n").contains("exception"));
        assert!(syntax_message("raise ValueError").contains("raise"));
        assert!(syntax_message("assert x").contains("assert"));
        assert!(syntax_message("del x").contains("del"));
        assert!(syntax_message("import os").contains("imports"));
    }

    #[test]
    fn rejects_comprehensions() {
        assert!(syntax_message("x = [i for i in range(3)]").contains("comprehensions"));
        assert!(syntax_message("x = sum(i for i in range(3))").contains("comprehensions"));
        assert!(syntax_message("x = {k: 1 for k in y}").contains("comprehensions"));
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(parse("x = (1").is_err());
        assert!(parse("if x\n  y = 1").is_err());
        assert!(parse("x = = 1").is_err());
        assert!(parse("1 = x").is_err());
        assert!(parse("else: x = 1").is_err());
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        assert!(syntax_message("break").contains("outside loop"));
        assert!(syntax_message("if x:\n    continue\n").contains("outside loop"));
        assert!(parse("while True:\n    if x:\n        break\n").is_ok());
        assert!(syntax_message("for i in x:\n    pass\nelse:\n    break\n").contains("outside loop"));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse(&src).is_err());
    }

    #[test]
    fn slices_and_kwargs() {
        assert!(parse("y = x[1:3]\nz = x[::-1]\nr = round(1.25, ndigits=1)").is_ok());
    }
}
