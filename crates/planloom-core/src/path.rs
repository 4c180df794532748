//! Output-path utilities
//!
//! Plans address tool outputs with a mixed dotted/bracket notation
//! (`a.b`, `a[0]`, `a["k"]`, `items.0.name`). This module parses that
//! notation into typed segments, renders the canonical form, and walks
//! JSON values along a parsed path.

use serde_json::Value;

/// One segment of an output path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key lookup
    Key(String),
    /// Array index lookup
    Index(usize),
}

impl PathSegment {
    /// Create a key segment
    pub fn key(name: impl Into<String>) -> Self {
        Self::Key(name.into())
    }

    /// Create an index segment
    pub fn index(idx: usize) -> Self {
        Self::Index(idx)
    }
}

/// True when `input` is a non-empty run of ASCII digits.
///
/// Dotted numeric segments (`items.0.name`) stay keys at parse time;
/// consumers coerce them to indices only when the value at hand is an
/// array.
pub fn is_numeric_string(input: &str) -> bool {
    !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit())
}

/// Parse mixed dotted/bracket notation into segments.
///
/// Bracketed numbers become [`PathSegment::Index`], quoted bracket
/// content becomes a key, and empty dotted segments are discarded.
pub fn parse(input: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut buf = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => flush_key(&mut buf, &mut segments),
            '[' => {
                flush_key(&mut buf, &mut segments);
                match chars.peek().copied() {
                    Some(quote @ ('\'' | '"')) => {
                        chars.next();
                        let mut key = String::new();
                        for qc in chars.by_ref() {
                            if qc == quote {
                                break;
                            }
                            key.push(qc);
                        }
                        // skip everything up to and including the closing bracket
                        for bc in chars.by_ref() {
                            if bc == ']' {
                                break;
                            }
                        }
                        segments.push(PathSegment::Key(key));
                    }
                    _ => {
                        let mut inner = String::new();
                        let mut closed = false;
                        while let Some(bc) = chars.next() {
                            if bc == ']' {
                                closed = true;
                                break;
                            }
                            inner.push(bc);
                        }
                        if !closed {
                            if !inner.is_empty() {
                                segments.push(PathSegment::Key(inner));
                            }
                        } else if is_numeric_string(&inner) {
                            if let Ok(idx) = inner.parse::<usize>() {
                                segments.push(PathSegment::Index(idx));
                            } else {
                                segments.push(PathSegment::Key(inner));
                            }
                        } else if !inner.is_empty() {
                            segments.push(PathSegment::Key(inner));
                        }
                    }
                }
            }
            _ => buf.push(c),
        }
    }
    flush_key(&mut buf, &mut segments);
    segments
}

fn flush_key(buf: &mut String, segments: &mut Vec<PathSegment>) {
    if !buf.is_empty() {
        segments.push(PathSegment::Key(std::mem::take(buf)));
    }
}

/// Render segments in the canonical mixed form.
///
/// Index segments render as `[i]`, key segments join with `.` (the
/// first key has no leading dot). `parse(format(p)) == p` for any path
/// of plain keys and indices.
pub fn format(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(idx) => {
                out.push('[');
                out.push_str(&idx.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Canonicalize a path string: `format(parse(input))`.
pub fn normalize(input: &str) -> String {
    format(&parse(input))
}

/// Walk a JSON value along a parsed path.
///
/// Key segments look up object entries; index segments look up array
/// elements. A key segment of pure digits applied to an array is
/// coerced to an index. Any miss (absent key, out-of-range index,
/// non-container intermediate) yields `None`.
pub fn get_nested_value<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get(key)?,
            (Value::Object(map), PathSegment::Index(idx)) => map.get(&idx.to_string())?,
            (Value::Array(items), PathSegment::Index(idx)) => items.get(*idx)?,
            (Value::Array(items), PathSegment::Key(key)) if is_numeric_string(key) => {
                items.get(key.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}
