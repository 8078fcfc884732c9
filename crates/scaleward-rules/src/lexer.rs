//! Tokenizer for rule text.
//!
//! Produces an indentation-aware token stream: `Indent`/`Dedent` mark
//! block structure and `Newline` ends a logical line. Newlines inside
//! brackets and after a trailing backslash do not end the line.

use crate::error::{EvalError, EvalResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Operators, longest first so that greedy matching works.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+", "-",
    "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

pub(crate) fn tokenize(source: &str) -> EvalResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indents: Vec<usize>,
    depth: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            depth: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn run(mut self) -> EvalResult<Vec<Token>> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '"' | '\'' => self.string(c)?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.name(),
                _ => self.operator()?,
            }
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    /// Measure leading whitespace; returns `false` when the line is blank
    /// or comment-only (and has been consumed).
    fn handle_indentation(&mut self) -> EvalResult<bool> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(false);
            }
            Some(_) => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(EvalError::syntax(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(true)
    }

    fn push_newline(&mut self) {
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline);
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn name(&mut self) {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.push(Tok::Name(name));
    }

    fn number(&mut self) -> EvalResult<()> {
        let start = self.pos;
        let mut is_float = false;

        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += digit_at;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(EvalError::syntax(self.line, "invalid decimal literal"));
        }

        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| EvalError::syntax(self.line, format!("invalid number '{text}'")))?;
            self.push(Tok::Float(value));
        } else {
            let value = text.parse::<i64>().map_err(|_| {
                EvalError::syntax(self.line, format!("integer literal too large: {text}"))
            })?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn string(&mut self, quote: char) -> EvalResult<()> {
        let line = self.line;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(EvalError::syntax(line, "unterminated string literal"));
            };
            self.pos += 1;
            match c {
                c if c == quote => break,
                '\n' => return Err(EvalError::syntax(line, "unterminated string literal")),
                '\\' => {
                    let Some(esc) = self.peek() else {
                        return Err(EvalError::syntax(line, "unterminated string literal"));
                    };
                    self.pos += 1;
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' => out.push('\\'),
                        '\'' => out.push('\''),
                        '"' => out.push('"'),
                        '\n' => self.line += 1,
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                c => out.push(c),
            }
        }
        self.push(Tok::Str(out));
        Ok(())
    }

    fn operator(&mut self) -> EvalResult<()> {
        for op in OPERATORS {
            let len = op.chars().count();
            if self.pos + len <= self.chars.len()
                && self.chars[self.pos..self.pos + len].iter().copied().eq(op.chars())
            {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(EvalError::syntax(
            self.line,
            format!("invalid character '{c}'"),
        ))
    }
}
