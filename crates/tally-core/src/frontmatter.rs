//! Minimal frontmatter codec.
//!
//! Handles the `---` delimited header at the very start of a markdown file:
//! ```markdown
//! ---
//! view_count: 12
//! title: "Alpha"
//! tags:
//!   - rust
//! ---
//! Body content here
//! ```
//!
//! Only a flat `key: value` subset is understood. Scalars that are not
//! recognised are kept raw and written back verbatim, and indented blocks
//! under an empty key (nested maps) are carried through untouched.

use std::fmt::Write as _;

const DELIMITER: &str = "---";

/// A single header value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    String(String),
    List(Vec<FieldValue>),
    /// Unrecognised scalar text, written back as-is.
    Raw(String),
    /// Indented continuation lines under an empty key, written back as-is.
    Block(String),
}

impl FieldValue {
    /// Numeric view of the value, if it has one.
    ///
    /// Floats truncate toward zero; strings are parsed.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Self::String(s) | Self::Raw(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
            }
            _ => None,
        }
    }

    /// JSON rendering of the value, used for machine-readable output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Integer(n) => serde_json::Value::from(*n),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Null => serde_json::Value::Null,
            Self::String(s) | Self::Raw(s) | Self::Block(s) => serde_json::Value::from(s.as_str()),
            Self::List(items) => items.iter().map(Self::to_json).collect(),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// An ordered header map. Insertion order is kept so rewrites are stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    entries: Vec<(String, FieldValue)>,
}

impl Header {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Set `key`, replacing an existing value in place or appending a new entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Merge every entry of `other` into `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: &Header) {
        for (key, value) in &other.entries {
            self.set(key.clone(), value.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Header {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut header = Header::new();
        for (k, v) in iter {
            header.set(k, v);
        }
        header
    }
}

/// Split file content into the raw header text (if any) and the body.
///
/// A header exists only when the content starts with a `---` line and a
/// later line is exactly `---`. Otherwise the whole content is body.
#[must_use]
pub fn split_header(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            let header = &rest[..offset];
            let header = header.strip_suffix('\n').unwrap_or(header);
            let header = header.strip_suffix('\r').unwrap_or(header);
            return (Some(header), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }

    (None, content)
}

/// Parse raw header text into a [`Header`]. Never fails: lines that are
/// not `key: value` pairs are skipped.
#[must_use]
pub fn parse_header(text: &str) -> Header {
    let lines: Vec<&str> = text.lines().collect();
    let mut header = Header::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if line.trim().is_empty() || line.starts_with([' ', '\t']) || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let value = value.trim();
        let start = i;
        while i < lines.len() && is_continuation(lines[i]) {
            i += 1;
        }
        let block = &lines[start..i];

        if !value.is_empty() {
            // `key: |` or `key: >` with an indented body: keep it verbatim.
            let parsed = if block.is_empty() {
                parse_scalar(value)
            } else {
                FieldValue::Raw(format!("{value}\n{}", block.join("\n")))
            };
            header.set(key, parsed);
            continue;
        }

        let parsed = if block.is_empty() {
            FieldValue::Raw(String::new())
        } else if block.iter().all(|l| l.trim_start().starts_with('-')) {
            FieldValue::List(
                block
                    .iter()
                    .map(|l| parse_scalar(l.trim_start()[1..].trim()))
                    .collect(),
            )
        } else {
            FieldValue::Block(block.join("\n"))
        };
        header.set(key, parsed);
    }

    header
}

fn is_continuation(line: &str) -> bool {
    !line.trim().is_empty() && (line.starts_with([' ', '\t']) || line.starts_with("- "))
}

fn parse_scalar(s: &str) -> FieldValue {
    match s {
        "null" | "~" => return FieldValue::Null,
        "true" => return FieldValue::Bool(true),
        "false" => return FieldValue::Bool(false),
        _ => {}
    }

    // Only canonical spellings become numbers so `007` or `1.50` survive a rewrite.
    if let Ok(n) = s.parse::<i64>() {
        if n.to_string() == s {
            return FieldValue::Integer(n);
        }
    }
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() && f.to_string() == s {
                return FieldValue::Float(f);
            }
        }
    }

    if let Some(inner) = s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return FieldValue::String(unescape_double(inner));
    }
    if s.len() >= 2 {
        if let Some(inner) = s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
            return FieldValue::String(inner.replace("''", "'"));
        }
    }
    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        let inner = inner.trim();
        if inner.is_empty() {
            return FieldValue::List(Vec::new());
        }
        return FieldValue::List(inner.split(',').map(|item| parse_scalar(item.trim())).collect());
    }

    FieldValue::Raw(s.to_string())
}

fn unescape_double(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn scalar_to_string(value: &FieldValue) -> String {
    match value {
        FieldValue::Integer(n) => n.to_string(),
        FieldValue::Float(f) => f.to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Null => "null".to_string(),
        FieldValue::String(s) => quote(s),
        FieldValue::Raw(s) => s.clone(),
        FieldValue::Block(s) => quote(s),
        FieldValue::List(items) => {
            let inner: Vec<String> = items.iter().map(scalar_to_string).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

/// Serialize a header into its delimited block, including the trailing newline
/// after the closing `---`.
#[must_use]
pub fn serialize_header(header: &Header) -> String {
    let mut out = String::from("---\n");
    for (key, value) in header.iter() {
        match value {
            FieldValue::List(items) if !items.is_empty() => {
                let _ = writeln!(out, "{key}:");
                for item in items {
                    let _ = writeln!(out, "  - {}", scalar_to_string(item));
                }
            }
            FieldValue::Block(block) => {
                let _ = writeln!(out, "{key}:\n{block}");
            }
            FieldValue::Raw(raw) if raw.is_empty() => {
                let _ = writeln!(out, "{key}:");
            }
            other => {
                let _ = writeln!(out, "{key}: {}", scalar_to_string(other));
            }
        }
    }
    out.push_str("---\n");
    out
}

/// Replace the header of `content` with `header`, or prepend one if the
/// content has none. The body is carried over byte for byte.
#[must_use]
pub fn splice_header(content: &str, header: &Header) -> String {
    let (_, body) = split_header(content);
    let block = serialize_header(header);
    let mut output = String::with_capacity(block.len() + body.len());
    output.push_str(&block);
    output.push_str(body);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_header_extracts_header_and_body() {
        let content = "---\nview_count: 1\ntitle: x\n---\n## Hello\n";
        let (header, body) = split_header(content);
        assert_eq!(header, Some("view_count: 1\ntitle: x"));
        assert_eq!(body, "## Hello\n");
    }

    #[test]
    fn split_header_without_opener_is_all_body() {
        let content = "Just content\n---\n";
        assert_eq!(split_header(content), (None, content));
    }

    #[test]
    fn split_header_without_closer_is_all_body() {
        let content = "---\nview_count: 1\nno closer";
        assert_eq!(split_header(content), (None, content));
    }

    #[test]
    fn split_header_handles_empty_and_crlf() {
        assert_eq!(split_header("---\n---\nbody"), (Some(""), "body"));
        let (header, body) = split_header("---\r\nview_count: 2\r\n---\r\nbody\r\n");
        assert_eq!(header, Some("view_count: 2"));
        assert_eq!(body, "body\r\n");
    }

    #[test]
    fn parse_recognises_scalars() {
        let header = parse_header(
            "count: 3\nratio: 0.5\ndone: true\nnothing: null\ntitle: \"A \\\"quoted\\\" title\"\nsingle: 'it''s'\ndate: 2025-02-10\nzip: 007",
        );
        assert_eq!(header.get("count"), Some(&FieldValue::Integer(3)));
        assert_eq!(header.get("ratio"), Some(&FieldValue::Float(0.5)));
        assert_eq!(header.get("done"), Some(&FieldValue::Bool(true)));
        assert_eq!(header.get("nothing"), Some(&FieldValue::Null));
        assert_eq!(
            header.get("title"),
            Some(&FieldValue::String("A \"quoted\" title".to_string()))
        );
        assert_eq!(header.get("single"), Some(&FieldValue::String("it's".to_string())));
        assert_eq!(header.get("date"), Some(&FieldValue::Raw("2025-02-10".to_string())));
        assert_eq!(header.get("zip"), Some(&FieldValue::Raw("007".to_string())));
    }

    #[test]
    fn parse_recognises_both_array_forms() {
        let header = parse_header("tags:\n  - rust\n  - \"notes\"\ninline: [1, two, \"three\"]\nempty: []");
        assert_eq!(
            header.get("tags"),
            Some(&FieldValue::List(vec![
                FieldValue::Raw("rust".to_string()),
                FieldValue::String("notes".to_string()),
            ]))
        );
        assert_eq!(
            header.get("inline"),
            Some(&FieldValue::List(vec![
                FieldValue::Integer(1),
                FieldValue::Raw("two".to_string()),
                FieldValue::String("three".to_string()),
            ]))
        );
        assert_eq!(header.get("empty"), Some(&FieldValue::List(vec![])));
    }

    #[test]
    fn parse_skips_garbage_lines() {
        let header = parse_header("not a pair\n: no key\n# comment\nview_count: 4");
        assert_eq!(header.len(), 1);
        assert_eq!(header.get("view_count"), Some(&FieldValue::Integer(4)));
    }

    #[test]
    fn nested_block_survives_rewrite() {
        let text = "author:\n  name: Jane\n  email: j@x.io\nview_count: 1";
        let mut header = parse_header(text);
        header.set("view_count", 2);
        let out = serialize_header(&header);
        assert_eq!(out, "---\nauthor:\n  name: Jane\n  email: j@x.io\nview_count: 2\n---\n");
    }

    #[test]
    fn block_scalar_survives_rewrite() {
        let content = "---\ndescription: |\n  first line\n  second line\nsummary: >\n  folded\nview_count: 1\n---\nBody";
        let mut header = parse_header(split_header(content).0.unwrap());
        header.set("view_count", 2);
        assert_eq!(
            splice_header(content, &header),
            "---\ndescription: |\n  first line\n  second line\nsummary: >\n  folded\nview_count: 2\n---\nBody"
        );
        assert_eq!(header.get("view_count"), Some(&FieldValue::Integer(2)));
    }

    #[test]
    fn serialize_is_deterministic() {
        let header: Header = [
            ("view_count", FieldValue::Integer(5)),
            ("title", FieldValue::from("Alpha")),
            ("pinned", FieldValue::Bool(false)),
            (
                "tags",
                FieldValue::List(vec![FieldValue::from("a"), FieldValue::Integer(2)]),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            serialize_header(&header),
            "---\nview_count: 5\ntitle: \"Alpha\"\npinned: false\ntags:\n  - \"a\"\n  - 2\n---\n"
        );
    }

    #[test]
    fn splice_replaces_existing_header_and_keeps_body() {
        let content = "---\nview_count: 1\n---\nBody text";
        let mut header = parse_header(split_header(content).0.unwrap());
        header.set("view_count", 5);
        assert_eq!(splice_header(content, &header), "---\nview_count: 5\n---\nBody text");
    }

    #[test]
    fn splice_prepends_header_when_missing() {
        let mut header = Header::new();
        header.set("view_count", 1);
        assert_eq!(
            splice_header("Just content", &header),
            "---\nview_count: 1\n---\nJust content"
        );
    }

    #[test]
    fn as_i64_reads_numeric_views() {
        assert_eq!(FieldValue::Integer(7).as_i64(), Some(7));
        assert_eq!(FieldValue::Float(2.9).as_i64(), Some(2));
        assert_eq!(FieldValue::String("12".to_string()).as_i64(), Some(12));
        assert_eq!(FieldValue::Raw("007".to_string()).as_i64(), Some(7));
        assert_eq!(FieldValue::Raw("abc".to_string()).as_i64(), None);
        assert_eq!(FieldValue::Bool(true).as_i64(), None);
    }

    #[test]
    fn header_set_replaces_in_place() {
        let mut header = parse_header("a: 1\nb: 2\nc: 3");
        header.set("b", 20);
        let keys: Vec<&str> = header.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(header.get("b"), Some(&FieldValue::Integer(20)));
        assert_eq!(header.remove("a"), Some(FieldValue::Integer(1)));
        assert_eq!(header.len(), 2);
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn splice_never_touches_the_body(body in "[^-][\\PC\n]{0,200}", count in 0i64..1_000_000) {
                let mut header = Header::new();
                header.set("view_count", count);
                let written = splice_header(&body, &header);
                let (raw, rest) = split_header(&written);
                prop_assert_eq!(rest, body.as_str());
                let parsed = parse_header(raw.unwrap());
                prop_assert_eq!(parsed.get("view_count"), Some(&FieldValue::Integer(count)));

                header.set("view_count", count + 1);
                let rewritten = splice_header(&written, &header);
                prop_assert_eq!(split_header(&rewritten).1, body.as_str());
            }
        }
    }
}
