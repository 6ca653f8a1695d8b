//! Literal-expression parser for programmatic manifests
//!
//! A programmatic manifest assigns a literal mapping to a well-known
//! identifier at the top level of a Python script. The script is never
//! executed: this module scans the source text for the assignment and parses
//! the right-hand side with a small recursive-descent parser that accepts
//! exactly the literal subset (strings, numbers, booleans, None, lists,
//! tuples, nested mappings). Anything else is rejected as non-literal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PyLiteralError {
    #[error("not a literal expression: {0}")]
    NonLiteral(String),

    #[error("syntax error in literal: {0}")]
    Syntax(String),
}

/// A parsed Python literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    List(Vec<Value>),
    /// Insertion-ordered key/value pairs of a dict literal
    Dict(Vec<(Value, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Locate a top-level `name = <literal>` assignment and parse its value.
///
/// Only assignments whose target is the bare identifier at column zero are
/// considered; tuple, attribute and subscript targets never match. Returns
/// `Ok(None)` when no such assignment exists.
pub fn extract_assignment(source: &str, name: &str) -> Result<Option<Value>, PyLiteralError> {
    let mut offset = 0usize;
    for line in source.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let rest = match line.strip_prefix(name) {
            Some(rest) => rest,
            None => continue,
        };
        // Reject longer identifiers (`ptr_params_extra`) and non-simple
        // targets (`ptr_params.key`, `ptr_params, other`).
        match rest.chars().next() {
            Some(c) if c.is_alphanumeric() || c == '_' || c == '.' || c == ',' || c == '[' => {
                continue
            }
            _ => {}
        }
        let trimmed = rest.trim_start_matches([' ', '\t']);
        let after_eq = match trimmed.strip_prefix('=') {
            Some(after) if !after.starts_with('=') => after,
            _ => continue,
        };

        let value_offset = line_start + (line.len() - after_eq.len());
        let mut parser = Parser::new(&source[value_offset..]);
        let value = parser.parse_value()?;
        return Ok(Some(value));
    }
    Ok(None)
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some('#') => {
                    for c in self.chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('\\') => {
                    // Line continuation
                    self.chars.next();
                    if self.chars.peek() == Some(&'\n') {
                        self.chars.next();
                    }
                }
                _ => return,
            }
        }
    }

    fn parse_value(&mut self) -> Result<Value, PyLiteralError> {
        self.skip_ws();
        match self.chars.peek() {
            Some('{') => self.parse_dict(),
            Some('[') => self.parse_sequence('[', ']'),
            Some('(') => self.parse_sequence('(', ')'),
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if c.is_ascii_digit() || *c == '-' || *c == '+' || *c == '.' => {
                self.parse_number()
            }
            Some(c) if c.is_alphabetic() || *c == '_' => self.parse_name(),
            Some(c) => Err(PyLiteralError::Syntax(format!("unexpected character `{c}`"))),
            None => Err(PyLiteralError::Syntax("unexpected end of input".to_string())),
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), PyLiteralError> {
        self.skip_ws();
        match self.chars.next() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(PyLiteralError::Syntax(format!(
                "expected `{expected}`, found `{c}`"
            ))),
            None => Err(PyLiteralError::Syntax(format!(
                "expected `{expected}`, found end of input"
            ))),
        }
    }

    fn parse_dict(&mut self) -> Result<Value, PyLiteralError> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&'}') {
                self.chars.next();
                return Ok(Value::Dict(entries));
            }
            let key = self.parse_value()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.push((key, value));
            self.skip_ws();
            match self.chars.peek() {
                Some(',') => {
                    self.chars.next();
                }
                Some('}') => {}
                other => {
                    return Err(PyLiteralError::Syntax(format!(
                        "expected `,` or `}}` in mapping, found {other:?}"
                    )))
                }
            }
        }
    }

    fn parse_sequence(&mut self, open: char, close: char) -> Result<Value, PyLiteralError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&close) {
                self.chars.next();
                return Ok(Value::List(items));
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.chars.peek() {
                Some(',') => {
                    self.chars.next();
                }
                Some(c) if *c == close => {}
                other => {
                    return Err(PyLiteralError::Syntax(format!(
                        "expected `,` or `{close}` in sequence, found {other:?}"
                    )))
                }
            }
        }
    }

    fn parse_string(&mut self) -> Result<Value, PyLiteralError> {
        let quote = self.chars.next().expect("caller peeked a quote");
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some('\\') => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c) => out.push(c),
                    None => {
                        return Err(PyLiteralError::Syntax(
                            "unterminated escape in string".to_string(),
                        ))
                    }
                },
                Some(c) if c == quote => return Ok(Value::Str(out)),
                Some('\n') => {
                    return Err(PyLiteralError::Syntax(
                        "unterminated string literal".to_string(),
                    ))
                }
                Some(c) => out.push(c),
                None => {
                    return Err(PyLiteralError::Syntax(
                        "unterminated string literal".to_string(),
                    ))
                }
            }
        }
    }

    fn parse_number(&mut self) -> Result<Value, PyLiteralError> {
        let mut raw = String::new();
        if matches!(self.chars.peek(), Some('-') | Some('+')) {
            raw.push(self.chars.next().expect("peeked sign"));
        }
        while let Some(c) = self.chars.peek() {
            if c.is_ascii_digit() || *c == '.' || *c == '_' || *c == 'e' || *c == 'E' {
                raw.push(self.chars.next().expect("peeked digit"));
            } else if (*c == '-' || *c == '+') && (raw.ends_with('e') || raw.ends_with('E')) {
                raw.push(self.chars.next().expect("peeked exponent sign"));
            } else {
                break;
            }
        }
        let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
        if !cleaned.contains('.') && !cleaned.contains('e') && !cleaned.contains('E') {
            if let Ok(n) = cleaned.parse::<i64>() {
                return Ok(Value::Int(n));
            }
        }
        cleaned
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| PyLiteralError::Syntax(format!("malformed number `{raw}`")))
    }

    fn parse_name(&mut self) -> Result<Value, PyLiteralError> {
        let mut ident = String::new();
        while let Some(c) = self.chars.peek() {
            if c.is_alphanumeric() || *c == '_' {
                ident.push(self.chars.next().expect("peeked identifier char"));
            } else {
                break;
            }
        }
        match ident.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::None),
            _ => Err(PyLiteralError::NonLiteral(ident)),
        }
    }
}
