//! Minimal JSON codec for the chat-completions wire format.
//!
//! The encoder works on [`JsonValue`], whose composite variant is a [`Table`]:
//! an insertion-ordered mapping whose keys are either 1-based positions or
//! names. A table encodes as a JSON array only when its keys are exactly the
//! positions `1..=len`; anything else encodes as an object (positions are
//! written as their decimal string). An empty table therefore encodes as `[]`.
//!
//! The decoder is deliberately narrow. The response shape is fixed and known,
//! so fields are located by key with a pattern scan instead of a full parse.

use std::fmt::Write;

/// Key of a [`Table`] entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKey {
    /// 1-based position.
    Index(usize),
    Name(String),
}

impl From<&str> for TableKey {
    fn from(s: &str) -> Self {
        Self::Name(s.to_string())
    }
}

impl From<String> for TableKey {
    fn from(s: String) -> Self {
        Self::Name(s)
    }
}

impl From<usize> for TableKey {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// Insertion-ordered mapping that encodes as either a JSON array or object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    entries: Vec<(TableKey, JsonValue)>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value stored under `key`.
    pub fn set(&mut self, key: impl Into<TableKey>, value: impl Into<JsonValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// Append at the next position (`len + 1`).
    pub fn push(&mut self, value: impl Into<JsonValue>) -> &mut Self {
        let next = self.entries.len() + 1;
        self.set(next, value)
    }

    pub fn get(&self, key: impl Into<TableKey>) -> Option<&JsonValue> {
        let key = key.into();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the keys are exactly the positions `1..=len`, in any order.
    pub fn is_sequence(&self) -> bool {
        let n = self.entries.len();
        let mut seen = vec![false; n];
        for (key, _) in &self.entries {
            match key {
                TableKey::Index(i) if (1..=n).contains(i) && !seen[i - 1] => seen[i - 1] = true,
                _ => return false,
            }
        }
        true
    }
}

/// A JSON-encodable value.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Table(Table),
}

impl JsonValue {
    /// Build an object from `(name, value)` pairs, preserving order.
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, JsonValue)>,
    {
        let mut table = Table::new();
        for (k, v) in pairs {
            table.set(TableKey::Name(k.into()), v);
        }
        Self::Table(table)
    }

    /// Build a sequence from values.
    pub fn array(values: impl IntoIterator<Item = JsonValue>) -> Self {
        let mut table = Table::new();
        for v in values {
            table.push(v);
        }
        Self::Table(table)
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Compact JSON text.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        encode_into(self, &mut out);
        out
    }
}

impl From<&str> for JsonValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for JsonValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for JsonValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u32> for JsonValue {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for JsonValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for JsonValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Table> for JsonValue {
    fn from(t: Table) -> Self {
        Self::Table(t)
    }
}

impl<T: Into<JsonValue>> From<Option<T>> for JsonValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

fn encode_into(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Null => out.push_str("null"),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Number(n) => encode_number(*n, out),
        JsonValue::String(s) => encode_string(s, out),
        JsonValue::Table(t) if t.is_sequence() => {
            let mut items: Vec<&(TableKey, JsonValue)> = t.entries.iter().collect();
            items.sort_by_key(|(k, _)| match k {
                TableKey::Index(i) => *i,
                TableKey::Name(_) => usize::MAX,
            });
            out.push('[');
            for (i, (_, v)) in items.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                encode_into(v, out);
            }
            out.push(']');
        }
        JsonValue::Table(t) => {
            out.push('{');
            for (i, (k, v)) in t.entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match k {
                    TableKey::Index(idx) => encode_string(&idx.to_string(), out),
                    TableKey::Name(name) => encode_string(name, out),
                }
                out.push(':');
                encode_into(v, out);
            }
            out.push('}');
        }
    }
}

fn encode_number(n: f64, out: &mut String) {
    if !n.is_finite() {
        // JSON has no NaN/Infinity
        out.push_str("null");
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        let _ = write!(out, "{}", n as i64);
    } else {
        let _ = write!(out, "{n}");
    }
}

fn encode_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// ── Narrow decoder ───────────────────────────────────────────────────

/// Find the first `"key": "<string>"` in `json` at or after byte `from`
/// and return the unescaped value together with the byte offset just past
/// its closing quote. Occurrences of the key whose value is not a string
/// are skipped.
pub fn find_string_field(json: &str, key: &str, from: usize) -> Option<(String, usize)> {
    let mut pos = from;
    while let Some(value_start) = find_value_start(json, key, pos) {
        if json[value_start..].starts_with('"') {
            if let Some((value, end)) = scan_string(json, value_start + 1) {
                return Some((value, end));
            }
            return None;
        }
        pos = value_start;
    }
    None
}

/// Value of the first `"key":` at or after byte `from`, if that value is a
/// string. Later occurrences are not considered.
pub fn first_string_field(json: &str, key: &str, from: usize) -> Option<(String, usize)> {
    let value_start = find_value_start(json, key, from)?;
    if !json[value_start..].starts_with('"') {
        return None;
    }
    scan_string(json, value_start + 1)
}

/// First string value stored under `key` anywhere in `json`.
pub fn extract_string_field(json: &str, key: &str) -> Option<String> {
    find_string_field(json, key, 0).map(|(v, _)| v)
}

/// First numeric value stored under `key` anywhere in `json`.
pub fn extract_number_field(json: &str, key: &str) -> Option<f64> {
    let mut pos = 0;
    while let Some(value_start) = find_value_start(json, key, pos) {
        let literal: String = json[value_start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
            .collect();
        if let Ok(n) = literal.parse::<f64>() {
            return Some(n);
        }
        pos = value_start;
    }
    None
}

/// Locate `"key"` followed by optional whitespace and a colon, and return
/// the byte offset of the first non-whitespace character after the colon.
fn find_value_start(json: &str, key: &str, from: usize) -> Option<usize> {
    let needle = format!("\"{key}\"");
    let mut search = from;
    while search <= json.len() {
        let found = search + json.get(search..)?.find(&needle)?;
        let after_key = found + needle.len();
        let rest = &json[after_key..];
        let trimmed = rest.trim_start();
        if let Some(after_colon) = trimmed.strip_prefix(':') {
            let value = after_colon.trim_start();
            return Some(json.len() - value.len());
        }
        search = after_key;
    }
    None
}

/// Scan a JSON string body starting just after its opening quote. Stops at
/// the first quote that is not escaped and returns the unescaped text plus
/// the byte offset following the closing quote. `None` if unterminated.
pub fn scan_string(json: &str, start: usize) -> Option<(String, usize)> {
    let mut escape_pending = false;
    for (offset, c) in json.get(start..)?.char_indices() {
        if escape_pending {
            escape_pending = false;
            continue;
        }
        match c {
            '\\' => escape_pending = true,
            '"' => {
                let raw = &json[start..start + offset];
                return Some((unescape(raw), start + offset + 1));
            }
            _ => {}
        }
    }
    None
}

/// Resolve JSON escape sequences. Unknown or malformed escapes are kept as
/// written.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0c}'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                let well_formed = hex.len() == 4 && hex.bytes().all(|b| b.is_ascii_hexdigit());
                match u32::from_str_radix(&hex, 16) {
                    Ok(code) if well_formed => {
                        for _ in 0..4 {
                            chars.next();
                        }
                        match decode_code_unit(code, &mut chars) {
                            Some(ch) => out.push(ch),
                            None => {
                                out.push_str("\\u");
                                out.push_str(&hex);
                            }
                        }
                    }
                    _ => out.push_str("\\u"),
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Turn a `\uXXXX` code unit into a char, consuming a following low
/// surrogate escape when `code` is a high surrogate.
fn decode_code_unit(
    code: u32,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Option<char> {
    if !(0xD800..0xDC00).contains(&code) {
        return char::from_u32(code);
    }
    let lookahead: String = chars.clone().take(6).collect();
    let low = lookahead
        .strip_prefix("\\u")
        .and_then(|h| u32::from_str_radix(h, 16).ok())
        .filter(|l| (0xDC00..0xE000).contains(l))?;
    for _ in 0..6 {
        chars.next();
    }
    char::from_u32(0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00))
}
