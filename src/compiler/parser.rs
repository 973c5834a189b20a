//! Lexer/parser for the signature mini-language.
//!
//! The syntax is preserved bit-for-bit for compatibility with existing
//! signature files:
//!
//! ```text
//! 4F 52        hex bytes
//! ??           any byte
//! [41] [!41]   byte set, optionally inverted
//! [41:5A]      byte range, optionally inverted with [!..:..]
//! {5} {2-9}    fixed / bounded wildcard gap
//! {2-*}        unbounded wildcard gap
//! (61|62 63)   alternative byte/string sequences
//! 'text'       literal string (ISO-8859-1 bytes)
//! *            unbounded gap separating subsequences
//! ```
//!
//! Whitespace is ignored everywhere. Parsing produces a flat list of typed
//! nodes; the compiler in [`super::compile`] turns those into anchors and
//! fragments.

use super::CompileError;

/// A parsed syntax node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A single byte value, possibly inverted (`[!HH]`).
    Byte { value: u8, inverted: bool },
    /// An inclusive byte range, possibly inverted.
    Range { from: u8, to: u8, inverted: bool },
    /// A literal string, as ISO-8859-1 bytes.
    Literal(Vec<u8>),
    /// `??` — any single byte.
    Any,
    /// `{n}` — exactly n wildcard bytes.
    Gap { size: u32 },
    /// `{n-m}` — between n and m wildcard bytes.
    GapRange { min: u32, max: u32 },
    /// `{n-*}` — n or more wildcard bytes.
    GapToMany { min: u32 },
    /// `(a|b)` — alternative sequences of bytes and strings.
    Alternatives(Vec<Vec<Node>>),
    /// `*` — an unbounded gap; terminates a subsequence.
    Wildcard,
}

struct Cursor<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, bytes: text.as_bytes(), pos: 0 }
    }

    fn read(&mut self) -> Option<u8> {
        let byte = self.bytes.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            message: message.into(),
            position: self.pos,
            expression: self.text.to_string(),
        }
    }

    fn hex_value(&self, digit: u8) -> Option<u8> {
        match digit {
            b'0'..=b'9' => Some(digit - b'0'),
            b'a'..=b'f' => Some(digit - b'a' + 10),
            b'A'..=b'F' => Some(digit - b'A' + 10),
            _ => None,
        }
    }

    /// Reads the second hex digit of a byte whose first digit is `first`.
    fn read_hex_byte(&mut self, first: u8) -> Result<u8, CompileError> {
        let high = self
            .hex_value(first)
            .ok_or_else(|| self.error(format!("expected a hex digit, found '{}'", first as char)))?;
        let second = self.read().ok_or_else(|| self.error("expected a second hex digit"))?;
        let low = self
            .hex_value(second)
            .ok_or_else(|| self.error(format!("expected a second hex digit, found '{}'", second as char)))?;
        Ok((high << 4) | low)
    }

    /// Reads a two-digit hex byte from the current position.
    fn read_hex_pair(&mut self) -> Result<u8, CompileError> {
        let first = self.read().ok_or_else(|| self.error("expected a hex byte"))?;
        self.read_hex_byte(first)
    }

    fn read_int(&mut self) -> Result<u32, CompileError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a number"));
        }
        self.text[start..self.pos]
            .parse::<u32>()
            .map_err(|_| self.error("number too large"))
    }

    /// Reads characters up to the closing quote, as ISO-8859-1 bytes.
    fn read_string(&mut self) -> Result<Vec<u8>, CompileError> {
        let mut value = Vec::new();
        for ch in self.text[self.pos..].chars() {
            self.pos += ch.len_utf8();
            if ch == '\'' {
                return Ok(value);
            }
            if (ch as u32) > 255 {
                return Err(self.error(format!("character '{ch}' cannot be expressed as a byte")));
            }
            value.push(ch as u8);
        }
        Err(self.error("unterminated 'string'"))
    }
}

/// Parses a whole byte-sequence expression, `*` wildcards included.
pub fn parse_expression(expression: &str) -> Result<Vec<Node>, CompileError> {
    let mut cursor = Cursor::new(expression);
    let mut nodes = Vec::new();

    while let Some(current) = cursor.read() {
        match current {
            b'*' => nodes.push(Node::Wildcard),
            b' ' | b'\n' | b'\r' | b'\t' => {}
            b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                let value = cursor.read_hex_byte(current)?;
                nodes.push(Node::Byte { value, inverted: false });
            }
            b'?' => {
                if cursor.read() != Some(b'?') {
                    return Err(cursor.error("? must be followed by another ?"));
                }
                nodes.push(Node::Any);
            }
            b'[' => nodes.push(parse_byte_set(&mut cursor)?),
            b'{' => nodes.push(parse_gap(&mut cursor)?),
            b'(' => nodes.push(parse_alternatives(&mut cursor)?),
            b'\'' => nodes.push(Node::Literal(cursor.read_string()?)),
            other => {
                return Err(cursor.error(format!("unexpected character '{}'", other as char)));
            }
        }
    }

    Ok(nodes)
}

/// `[HH]`, `[!HH]`, `[HH:HH]` or `[!HH:HH]`.
fn parse_byte_set(cursor: &mut Cursor<'_>) -> Result<Node, CompileError> {
    let inverted = if cursor.peek() == Some(b'!') {
        cursor.read();
        true
    } else {
        false
    };
    let first = cursor.read_hex_pair()?;
    match cursor.read() {
        Some(b']') => Ok(Node::Byte { value: first, inverted }),
        Some(b':') => {
            let second = cursor.read_hex_pair()?;
            if cursor.read() == Some(b']') {
                Ok(Node::Range { from: first, to: second, inverted })
            } else {
                Err(cursor.error("[] range not closed with ]"))
            }
        }
        _ => Err(cursor.error("[] syntax incorrect")),
    }
}

/// `{n}`, `{n-m}` or `{n-*}`.
fn parse_gap(cursor: &mut Cursor<'_>) -> Result<Node, CompileError> {
    let first = cursor.read_int()?;
    match cursor.read() {
        Some(b'}') => Ok(Node::Gap { size: first }),
        Some(b'-') => {
            if cursor.peek() == Some(b'*') {
                cursor.read();
                if cursor.read() == Some(b'}') {
                    Ok(Node::GapToMany { min: first })
                } else {
                    Err(cursor.error("{n-*} not closed with }"))
                }
            } else {
                let second = cursor.read_int()?;
                if cursor.read() == Some(b'}') {
                    Ok(Node::GapRange { min: first, max: second })
                } else {
                    Err(cursor.error("{n-m} not closed with }"))
                }
            }
        }
        _ => Err(cursor.error("{} wildcard syntax incorrect")),
    }
}

/// `(seq|seq|...)` where each sequence is hex bytes and/or 'strings'.
fn parse_alternatives(cursor: &mut Cursor<'_>) -> Result<Node, CompileError> {
    let mut alternatives: Vec<Vec<Node>> = Vec::new();
    let mut sequence: Vec<Node> = Vec::new();

    loop {
        let Some(current) = cursor.read() else {
            return Err(cursor.error("alternatives (a|b) not closed with )"));
        };
        match current {
            b')' => {
                if sequence.is_empty() {
                    return Err(cursor.error("empty alternative before )"));
                }
                alternatives.push(sequence);
                return Ok(Node::Alternatives(alternatives));
            }
            b' ' | b'\n' | b'\r' | b'\t' => {}
            b'|' => {
                if sequence.is_empty() {
                    return Err(cursor.error("no sequence defined before alternative |"));
                }
                alternatives.push(std::mem::take(&mut sequence));
            }
            b'\'' => sequence.push(Node::Literal(cursor.read_string()?)),
            other => {
                let value = cursor.read_hex_byte(other)?;
                sequence.push(Node::Byte { value, inverted: false });
            }
        }
    }
}
