//! Structural token model and the cursor seam
//!
//! A [`TokenCursor`] turns a response body into a forward-only sequence of
//! [`Token`]s. After each token the cursor reports the structural path of the
//! value the token belongs to:
//!
//! - the root value has the empty path (depth 0);
//! - a top-level field such as `results` has the path `["results"]` (depth 1);
//! - the third row has the path `["results", 2]` (depth 2).
//!
//! Start and end tokens of a container both report the container's own path.

use crate::error::{QenvError, Result};
use serde_json::{Map, Number, Value};
use std::fmt;

/// One structural parse event
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `{`
    StartObject,
    /// `}`
    EndObject,
    /// `[`
    StartArray,
    /// `]`
    EndArray,
    /// String scalar
    String(String),
    /// Numeric scalar
    Number(Number),
    /// `true` or `false`
    Bool(bool),
    /// `null`
    Null,
}

impl Token {
    /// Whether this token opens a container
    pub fn is_start(&self) -> bool {
        matches!(self, Token::StartObject | Token::StartArray)
    }

    /// Whether this token closes a container
    pub fn is_end(&self) -> bool {
        matches!(self, Token::EndObject | Token::EndArray)
    }
}

/// One step of a structural path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object member name
    Key(String),
    /// Array position
    Index(usize),
}

impl PathSegment {
    /// Member name, if this segment is one
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathSegment::Key(key) => Some(key),
            PathSegment::Index(_) => None,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(idx) => write!(f, "[{}]", idx),
        }
    }
}

/// Render a path as `metrics.resultCount` / `results[3]`
pub fn format_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        if let PathSegment::Key(_) = segment {
            if !out.is_empty() {
                out.push('.');
            }
        }
        out.push_str(&segment.to_string());
    }
    out
}

/// Forward-only source of structural tokens
pub trait TokenCursor {
    /// Advance to the next token; `None` once the document is complete.
    fn next_token(&mut self) -> Result<Option<Token>>;

    /// Path of the value the last token belongs to
    fn path(&self) -> &[PathSegment];

    /// Nesting depth of the last token (`path().len()`)
    fn depth(&self) -> usize {
        self.path().len()
    }

    /// Bytes consumed from the underlying stream so far
    fn bytes_read(&self) -> u64;

    /// Build a value tree from `first` and, for containers, every token up to
    /// the matching end.
    fn capture(&mut self, first: Token) -> Result<Value> {
        let root = match first {
            Token::String(s) => return Ok(Value::String(s)),
            Token::Number(n) => return Ok(Value::Number(n)),
            Token::Bool(b) => return Ok(Value::Bool(b)),
            Token::Null => return Ok(Value::Null),
            Token::StartObject => Value::Object(Map::new()),
            Token::StartArray => Value::Array(Vec::new()),
            Token::EndObject | Token::EndArray => {
                return Err(QenvError::Internal(
                    "capture started on a closing token".to_string(),
                ))
            }
        };

        // (member name in parent, partially built container)
        let mut stack: Vec<(Option<String>, Value)> = vec![(None, root)];
        loop {
            let token = self.next_token()?.ok_or(QenvError::UnexpectedEof {
                offset: self.bytes_read(),
            })?;
            let key = self
                .path()
                .last()
                .and_then(PathSegment::as_key)
                .map(str::to_string);

            let value = match token {
                Token::StartObject => {
                    stack.push((key, Value::Object(Map::new())));
                    continue;
                }
                Token::StartArray => {
                    stack.push((key, Value::Array(Vec::new())));
                    continue;
                }
                Token::EndObject | Token::EndArray => {
                    let (done_key, done) = stack
                        .pop()
                        .ok_or_else(|| QenvError::Internal("capture stack underflow".to_string()))?;
                    if stack.is_empty() {
                        return Ok(done);
                    }
                    attach(&mut stack, done_key, done)?;
                    continue;
                }
                Token::String(s) => Value::String(s),
                Token::Number(n) => Value::Number(n),
                Token::Bool(b) => Value::Bool(b),
                Token::Null => Value::Null,
            };
            attach(&mut stack, key, value)?;
        }
    }

    /// Consume the remainder of the value opened by `first` without building it.
    fn skip(&mut self, first: &Token) -> Result<()> {
        if !first.is_start() {
            return Ok(());
        }
        let mut open = 1usize;
        while open > 0 {
            let token = self.next_token()?.ok_or(QenvError::UnexpectedEof {
                offset: self.bytes_read(),
            })?;
            if token.is_start() {
                open += 1;
            } else if token.is_end() {
                open -= 1;
            }
        }
        Ok(())
    }
}

fn attach(stack: &mut [(Option<String>, Value)], key: Option<String>, value: Value) -> Result<()> {
    match stack.last_mut() {
        Some((_, Value::Object(map))) => {
            let key = key.ok_or_else(|| {
                QenvError::Internal("object member reported without a key".to_string())
            })?;
            map.insert(key, value);
            Ok(())
        }
        Some((_, Value::Array(items))) => {
            items.push(value);
            Ok(())
        }
        _ => Err(QenvError::Internal(
            "capture parent is not a container".to_string(),
        )),
    }
}
