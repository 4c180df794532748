//! Tolerant JSON decoding for model-authored plans
//!
//! Models routinely emit almost-JSON: unquoted keys, single-quoted
//! strings, trailing commas, and comments. Nothing here guesses at
//! structure; the reader accepts exactly those relaxations on top of
//! standard JSON and rejects everything else with an offset.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Decode failure, positioned by character offset into the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct LenientError {
    /// What went wrong
    pub message: String,
    /// Character offset of the failure
    pub offset: usize,
}

/// Decode a JSON document, tolerating unquoted identifier keys,
/// single-quoted strings, trailing commas, and `//` / `/* */` comments.
pub fn from_str(input: &str) -> Result<Value, LenientError> {
    let mut reader = Reader::new(input);
    let value = reader.parse_value()?;
    reader.skip_trivia();
    if reader.peek().is_some() {
        return Err(reader.error("trailing characters after value"));
    }
    Ok(value)
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
}

impl Reader {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> LenientError {
        LenientError {
            message: message.into(),
            offset: self.pos,
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.pos += 1;
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.pos += 2;
                    while self.peek().is_some() {
                        if self.peek() == Some('*') && self.peek_at(1) == Some('/') {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn parse_value(&mut self) -> Result<Value, LenientError> {
        self.skip_trivia();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some(quote @ ('"' | '\'')) => Ok(Value::String(self.parse_string(quote)?)),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => {
                self.parse_number()
            }
            Some(c) if is_ident_start(c) => {
                let word = self.parse_word();
                match word.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    _ => Err(self.error(format!("unexpected token '{}'", word))),
                }
            }
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    fn parse_object(&mut self) -> Result<Value, LenientError> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some('}') => {
                    self.bump();
                    return Ok(Value::Object(map));
                }
                None => return Err(self.error("unterminated object")),
                _ => {}
            }
            let key = self.parse_key()?;
            self.skip_trivia();
            if self.peek() != Some(':') {
                return Err(self.error("expected ':' after object key"));
            }
            self.bump();
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {
                    self.bump();
                    return Ok(Value::Object(map));
                }
                _ => return Err(self.error("expected ',' or '}' in object")),
            }
        }
    }

    fn parse_key(&mut self) -> Result<String, LenientError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => self.parse_string(quote),
            Some(c) if is_ident_start(c) => Ok(self.parse_word()),
            _ => Err(self.error("expected object key")),
        }
    }

    fn parse_array(&mut self) -> Result<Value, LenientError> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some(']') => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                None => return Err(self.error("unterminated array")),
                _ => {}
            }
            items.push(self.parse_value()?);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                _ => return Err(self.error("expected ',' or ']' in array")),
            }
        }
    }

    fn parse_string(&mut self, quote: char) -> Result<String, LenientError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    None => return Err(self.error("unterminated escape")),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('b') => out.push('\u{0008}'),
                    Some('f') => out.push('\u{000C}'),
                    Some('u') => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let digit = self
                                .bump()
                                .and_then(|c| c.to_digit(16))
                                .ok_or_else(|| self.error("invalid unicode escape"))?;
                            code = code * 16 + digit;
                        }
                        out.push(
                            char::from_u32(code)
                                .ok_or_else(|| self.error("invalid unicode escape"))?,
                        );
                    }
                    Some('\n') => {}
                    Some(other) => out.push(other),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if is_ident_char(c) {
                word.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        word
    }

    fn parse_number(&mut self) -> Result<Value, LenientError> {
        let start = self.pos;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        let trimmed = text.strip_prefix('+').unwrap_or(&text);
        let number = if trimmed.contains(['.', 'e', 'E']) {
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
        } else {
            trimmed
                .parse::<i64>()
                .ok()
                .map(Number::from)
                .or_else(|| trimmed.parse::<u64>().ok().map(Number::from))
        };
        match number {
            Some(n) => Ok(Value::Number(n)),
            None => Err(LenientError {
                message: format!("invalid number '{}'", text),
                offset: start,
            }),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json_round_trips() {
        let value = from_str(r#"{"a": [1, 2.5, true, null], "b": "text"}"#).expect("decode");
        assert_eq!(value, json!({"a": [1, 2.5, true, null], "b": "text"}));
    }

    #[test]
    fn test_unquoted_keys() {
        let value = from_str(r#"{toolName: "search", $fromStep: "s1"}"#).expect("decode");
        assert_eq!(value, json!({"toolName": "search", "$fromStep": "s1"}));
    }

    #[test]
    fn test_single_quotes_and_trailing_commas() {
        let value = from_str(r#"[{'a': 'it''s ok', }, 2,]"#);
        // consecutive strings are not concatenated; use an escaped quote
        assert!(value.is_err());
        let value = from_str(r#"[{'a': 'it\'s ok', }, 2,]"#).expect("decode");
        assert_eq!(value, json!([{"a": "it's ok"}, 2]));
    }

    #[test]
    fn test_comments_are_skipped() {
        let text = r#"{
            // leading comment
            "a": 1, /* inline */ "b": [2, 3], // trailing
        }"#;
        assert_eq!(from_str(text).expect("decode"), json!({"a": 1, "b": [2, 3]}));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            from_str(r#""line\nbreak A""#).expect("decode"),
            json!("line\nbreak A")
        );
    }

    #[test]
    fn test_errors_carry_offsets() {
        let err = from_str("{broken").expect_err("must fail");
        assert!(err.message.contains("expected"));
        let err = from_str("").expect_err("must fail");
        assert_eq!(err.message, "unexpected end of input");
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(from_str("{} extra").is_err());
    }
}
