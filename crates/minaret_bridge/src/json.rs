//! Minimal JSON value tree with a lenient parser and a compact generator.
//!
//! Requests arrive from arbitrary clients, so the parser degrades gracefully
//! instead of rejecting everything that is not strictly valid JSON:
//!
//! * Blank input parses to an empty object.
//! * Unterminated objects, arrays and strings are closed at end of input.
//! * A non-string where an object key is expected ends that object; the
//!   entries read so far are kept and the rest of the input is ignored.
//! * Anything unrecognised is read as a number. Only when that read yields
//!   no valid number (or a `true`/`false`/`null` literal is misspelled) does
//!   parsing fail with a [`JsonError`].
//! * Trailing content after the top-level value is ignored.
//! * Nesting deeper than [`MAX_DEPTH`] fails with [`JsonError::TooDeep`].
//!
//! The generator always produces compact output with no whitespace and keeps
//! object keys in insertion order.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use thiserror::Error;

/// Integral floats below this magnitude are rendered without a fraction.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Deepest array/object nesting the parser accepts.
pub const MAX_DEPTH: usize = 128;

/// Errors raised when the input cannot be read even leniently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonError {
    /// A `true`, `false` or `null` literal was misspelled
    #[error("Invalid literal at position {position}")]
    InvalidLiteral { position: usize },
    /// The best-effort number read found no valid number
    #[error("Invalid number at position {position}")]
    InvalidNumber { position: usize },
    /// Arrays and objects nest deeper than [`MAX_DEPTH`]
    #[error("Nesting too deep at position {position}")]
    TooDeep { position: usize },
}

/// A JSON number, keeping integers and floating values apart.
///
/// A literal is a `Float` when it carries a fraction or an exponent and an
/// `Int` otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

/// A parsed or generated JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(Map),
}

/// Insertion-ordered object map with unique keys.
///
/// Inserting an existing key replaces its value in place, so the key keeps
/// its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map {
    entries: Vec<(String, Value)>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }
}

impl IntoIterator for Map {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl Value {
    /// Looks up `key` when this value is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(Number::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&generate(self))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(Number::Int(i64::from(value)))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Number::Int(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(Number::Float(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Object(value)
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parses `text` into a [`Value`].
///
/// # Arguments
///
/// * `text` - Raw JSON text, possibly malformed
///
/// # Returns
///
/// The parsed value, an empty object for blank input, or a [`JsonError`]
/// when a token cannot be read at all.
pub fn parse(text: &str) -> Result<Value, JsonError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Parser::new(trimmed).read_value()
}

/// Parses `text` and projects the top-level object onto string values.
///
/// Strings are kept verbatim, other non-null values are stringified as
/// compact JSON and nulls are dropped. Input that is not an object yields an
/// empty map.
pub fn parse_flat(text: &str) -> Result<HashMap<String, String>, JsonError> {
    let flat = match parse(text)? {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key, s)),
                other => Some((key, generate(&other))),
            })
            .collect(),
        _ => HashMap::new(),
    };
    Ok(flat)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn read_value(&mut self) -> Result<Value, JsonError> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(Value::Null),
            Some(b'{') => {
                self.descend()?;
                let object = self.read_object();
                self.depth -= 1;
                object.map(Value::Object)
            }
            Some(b'[') => {
                self.descend()?;
                let array = self.read_array();
                self.depth -= 1;
                array.map(Value::Array)
            }
            Some(b'"') => Ok(Value::String(self.read_string())),
            Some(b't' | b'f') => self.read_bool().map(Value::Bool),
            Some(b'n') => self.read_null(),
            Some(_) => self.read_number().map(Value::Number),
        }
    }

    fn descend(&mut self) -> Result<(), JsonError> {
        if self.depth >= MAX_DEPTH {
            return Err(JsonError::TooDeep { position: self.pos });
        }
        self.depth += 1;
        Ok(())
    }

    fn read_object(&mut self) -> Result<Map, JsonError> {
        let mut map = Map::new();
        self.pos += 1;
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(map);
        }

        while self.pos < self.bytes.len() {
            self.skip_whitespace();
            if self.peek() != Some(b'"') {
                // Non-string key: keep what we have and stop here.
                break;
            }
            let key = self.read_string();
            self.skip_whitespace();
            if self.peek() == Some(b':') {
                self.pos += 1;
            }
            let value = self.read_value()?;
            map.insert(key, value);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => break,
            }
        }
        Ok(map)
    }

    fn read_array(&mut self) -> Result<Vec<Value>, JsonError> {
        let mut items = Vec::new();
        self.pos += 1;
        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(items);
        }

        while self.pos < self.bytes.len() {
            items.push(self.read_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                _ => break,
            }
        }
        Ok(items)
    }

    /// Reads a string starting at an opening quote. Structural bytes are all
    /// ASCII, so every slice taken here lands on a char boundary.
    fn read_string(&mut self) -> String {
        self.pos += 1;
        let mut out = String::new();
        let mut run_start = self.pos;
        while let Some(byte) = self.peek() {
            match byte {
                b'"' => {
                    out.push_str(&self.src[run_start..self.pos]);
                    self.pos += 1;
                    return out;
                }
                b'\\' => {
                    out.push_str(&self.src[run_start..self.pos]);
                    self.read_escape(&mut out);
                    run_start = self.pos;
                }
                _ => self.pos += 1,
            }
        }
        out.push_str(&self.src[run_start..]);
        out
    }

    fn read_escape(&mut self, out: &mut String) {
        let Some(next) = self.bytes.get(self.pos + 1).copied() else {
            out.push('\\');
            self.pos += 1;
            return;
        };
        let unescaped = match next {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'b' => '\u{0008}',
            b'f' => '\u{000C}',
            b'u' => {
                if let Some(ch) = self.read_unicode_escape() {
                    out.push(ch);
                    return;
                }
                out.push_str("\\u");
                self.pos += 2;
                return;
            }
            _ => {
                // Unknown escape: keep the backslash, the next char is read as
                // part of the following run.
                out.push('\\');
                self.pos += 1;
                return;
            }
        };
        out.push(unescaped);
        self.pos += 2;
    }

    /// Decodes `\uXXXX` at the current position, combining surrogate pairs.
    fn read_unicode_escape(&mut self) -> Option<char> {
        let high = self.hex4(self.pos + 2)?;
        if !(0xD800..=0xDFFF).contains(&high) {
            self.pos += 6;
            return char::from_u32(high);
        }
        if (0xD800..=0xDBFF).contains(&high)
            && self.bytes.get(self.pos + 6) == Some(&b'\\')
            && self.bytes.get(self.pos + 7) == Some(&b'u')
        {
            if let Some(low) = self.hex4(self.pos + 8) {
                if (0xDC00..=0xDFFF).contains(&low) {
                    self.pos += 12;
                    let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    return char::from_u32(combined);
                }
            }
        }
        self.pos += 6;
        Some(char::REPLACEMENT_CHARACTER)
    }

    fn hex4(&self, at: usize) -> Option<u32> {
        let digits = self.bytes.get(at..at + 4)?;
        if !digits.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        u32::from_str_radix(&self.src[at..at + 4], 16).ok()
    }

    fn read_number(&mut self) -> Result<Number, JsonError> {
        let start = self.pos;
        let mut is_float = false;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        self.skip_digits();
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            self.skip_digits();
        }

        let literal = &self.src[start..self.pos];
        let invalid = || JsonError::InvalidNumber { position: start };
        if is_float {
            literal.parse::<f64>().map(Number::Float).map_err(|_| invalid())
        } else {
            literal.parse::<i64>().map(Number::Int).map_err(|_| invalid())
        }
    }

    fn skip_digits(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }

    fn read_bool(&mut self) -> Result<bool, JsonError> {
        let rest = &self.bytes[self.pos..];
        if rest.starts_with(b"true") {
            self.pos += 4;
            Ok(true)
        } else if rest.starts_with(b"false") {
            self.pos += 5;
            Ok(false)
        } else {
            Err(JsonError::InvalidLiteral { position: self.pos })
        }
    }

    fn read_null(&mut self) -> Result<Value, JsonError> {
        if self.bytes[self.pos..].starts_with(b"null") {
            self.pos += 4;
            Ok(Value::Null)
        } else {
            Err(JsonError::InvalidLiteral { position: self.pos })
        }
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Renders `value` as compact JSON.
pub fn generate(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Escapes `s` for use inside a JSON string literal (without the quotes).
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    escape_into(&mut out, s);
    out
}

fn escape_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if u32::from(c) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, *n),
        Value::String(s) => {
            out.push('"');
            escape_into(out, s);
            out.push('"');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('"');
                escape_into(out, key);
                out.push_str("\":");
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, number: Number) {
    match number {
        Number::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Number::Float(f) if !f.is_finite() => out.push_str("null"),
        Number::Float(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => {
            let _ = write!(out, "{}", f as i64);
        }
        Number::Float(f) if f.abs() >= 1e16 || f.abs() < 1e-5 => {
            let _ = write!(out, "{f:e}");
        }
        Number::Float(f) => {
            let _ = write!(out, "{f}");
        }
    }
}
