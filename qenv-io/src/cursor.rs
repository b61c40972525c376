//! Streaming JSON token cursor
//!
//! [`JsonCursor`] reads a response body byte by byte through a buffered
//! reader and reports one [`Token`] per structural event, together with the
//! path of the value it belongs to. Nothing is buffered beyond the current
//! token, so arbitrarily large row arrays stream in constant memory.

use qenv_format::{Limits, PathSegment, QenvError, Result, Token, TokenCursor};
use serde_json::Number;
use std::io::{BufRead, BufReader, Read};

#[derive(Debug, Clone, Copy)]
enum Frame {
    /// `first` until the first member has been read
    Object { first: bool },
    /// Number of elements read so far
    Array { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Pending,
    Open,
    Done,
}

/// [`TokenCursor`] over any byte stream carrying a single JSON document
pub struct JsonCursor<R: Read> {
    reader: BufReader<R>,
    limits: Limits,
    frames: Vec<Frame>,
    path: Vec<PathSegment>,
    pop_segment: bool,
    root: Root,
    offset: u64,
}

impl<R: Read> JsonCursor<R> {
    /// Create a cursor with default limits
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            limits: Limits::default(),
            frames: Vec::new(),
            path: Vec::new(),
            pop_segment: false,
            root: Root::Pending,
            offset: 0,
        }
    }

    /// Create a cursor with explicit limits
    pub fn with_limits(reader: R, limits: Limits) -> Result<Self> {
        limits.validate()?;
        let mut cursor = Self::new(reader);
        cursor.limits = limits;
        Ok(cursor)
    }

    /// Consume the cursor and return the underlying stream.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    fn syntax(&self, message: impl Into<String>) -> QenvError {
        QenvError::Syntax {
            offset: self.offset,
            message: message.into(),
        }
    }

    fn eof(&self) -> QenvError {
        QenvError::UnexpectedEof {
            offset: self.offset,
        }
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        let buf = self.reader.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn next_byte(&mut self) -> Result<u8> {
        match self.peek()? {
            Some(byte) => {
                self.bump();
                Ok(byte)
            }
            None => Err(self.eof()),
        }
    }

    /// Skip whitespace and return (without consuming) the next byte.
    fn peek_significant(&mut self) -> Result<Option<u8>> {
        loop {
            match self.peek()? {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.bump(),
                other => return Ok(other),
            }
        }
    }

    fn expect_significant(&mut self) -> Result<u8> {
        match self.peek_significant()? {
            Some(byte) => Ok(byte),
            None => Err(self.eof()),
        }
    }

    fn open(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= self.limits.max_depth {
            return Err(QenvError::LimitExceeded(format!(
                "nesting depth exceeds {} at byte {}",
                self.limits.max_depth, self.offset
            )));
        }
        self.frames.push(frame);
        Ok(())
    }

    fn close(&mut self, token: Token) -> Result<Option<Token>> {
        self.frames.pop();
        if self.frames.is_empty() {
            self.root = Root::Done;
        } else {
            self.pop_segment = true;
        }
        Ok(Some(token))
    }

    /// Position after `{` or `,` inside an object: read `"key" :`.
    fn read_member_name(&mut self) -> Result<String> {
        if self.expect_significant()? != b'"' {
            return Err(self.syntax("expected object member name"));
        }
        self.bump();
        let name = self.read_string()?;
        if self.expect_significant()? != b':' {
            return Err(self.syntax("expected ':' after member name"));
        }
        self.bump();
        Ok(name)
    }

    /// Read the string body after the opening quote.
    fn read_string(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        loop {
            let byte = self.next_byte()?;
            match byte {
                b'"' => break,
                b'\\' => {
                    let escaped = match self.next_byte()? {
                        b'"' => b'"',
                        b'\\' => b'\\',
                        b'/' => b'/',
                        b'b' => 0x08,
                        b'f' => 0x0C,
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'u' => {
                            let ch = self.read_unicode_escape()?;
                            let mut utf8 = [0u8; 4];
                            buf.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                            continue;
                        }
                        other => {
                            return Err(
                                self.syntax(format!("invalid escape '\\{}'", other as char))
                            )
                        }
                    };
                    buf.push(escaped);
                }
                0x00..=0x1F => return Err(self.syntax("control character in string")),
                _ => buf.push(byte),
            }
            if buf.len() > self.limits.max_string_len {
                return Err(QenvError::LimitExceeded(format!(
                    "string longer than {} bytes at byte {}",
                    self.limits.max_string_len, self.offset
                )));
            }
        }
        String::from_utf8(buf).map_err(|_| self.syntax("string is not valid UTF-8"))
    }

    fn read_hex4(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let byte = self.next_byte()?;
            let digit = (byte as char)
                .to_digit(16)
                .ok_or_else(|| self.syntax("invalid hex digit in \\u escape"))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }

    fn read_unicode_escape(&mut self) -> Result<char> {
        let first = self.read_hex4()?;
        let code = match first {
            0xD800..=0xDBFF => {
                if self.next_byte()? != b'\\' || self.next_byte()? != b'u' {
                    return Err(self.syntax("unpaired surrogate in \\u escape"));
                }
                let low = self.read_hex4()?;
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(self.syntax("invalid low surrogate in \\u escape"));
                }
                0x10000 + ((first - 0xD800) << 10) + (low - 0xDC00)
            }
            0xDC00..=0xDFFF => return Err(self.syntax("unpaired surrogate in \\u escape")),
            other => other,
        };
        char::from_u32(code).ok_or_else(|| self.syntax("invalid unicode scalar in \\u escape"))
    }

    fn read_number(&mut self) -> Result<Number> {
        let mut text = String::new();
        while let Some(byte) = self.peek()? {
            match byte {
                b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' => {
                    if text.len() >= self.limits.max_string_len {
                        return Err(QenvError::LimitExceeded(format!(
                            "number longer than {} bytes at byte {}",
                            self.limits.max_string_len, self.offset
                        )));
                    }
                    text.push(byte as char);
                    self.bump();
                }
                _ => break,
            }
        }
        serde_json::from_str::<Number>(&text)
            .map_err(|_| self.syntax(format!("invalid number '{}'", text)))
    }

    fn expect_literal(&mut self, literal: &'static [u8]) -> Result<()> {
        for &expected in literal {
            if self.next_byte()? != expected {
                return Err(self.syntax(format!(
                    "invalid literal, expected '{}'",
                    String::from_utf8_lossy(literal)
                )));
            }
        }
        Ok(())
    }

    /// Read the value that starts at the next significant byte.
    fn read_value(&mut self, segment: Option<PathSegment>) -> Result<Option<Token>> {
        let nested = segment.is_some();
        if let Some(segment) = segment {
            self.path.push(segment);
        }

        let token = match self.expect_significant()? {
            b'{' => {
                self.bump();
                self.open(Frame::Object { first: true })?;
                return Ok(Some(Token::StartObject));
            }
            b'[' => {
                self.bump();
                self.open(Frame::Array { len: 0 })?;
                return Ok(Some(Token::StartArray));
            }
            b'"' => {
                self.bump();
                Token::String(self.read_string()?)
            }
            b'-' | b'0'..=b'9' => Token::Number(self.read_number()?),
            b't' => {
                self.expect_literal(b"true")?;
                Token::Bool(true)
            }
            b'f' => {
                self.expect_literal(b"false")?;
                Token::Bool(false)
            }
            b'n' => {
                self.expect_literal(b"null")?;
                Token::Null
            }
            other => return Err(self.syntax(format!("unexpected character '{}'", other as char))),
        };

        if nested {
            self.pop_segment = true;
        } else {
            self.root = Root::Done;
        }
        Ok(Some(token))
    }
}

impl<R: Read> TokenCursor for JsonCursor<R> {
    fn next_token(&mut self) -> Result<Option<Token>> {
        if self.pop_segment {
            self.path.pop();
            self.pop_segment = false;
        }

        let segment = match self.frames.last().copied() {
            None => match self.root {
                Root::Pending => {
                    if self.peek_significant()?.is_none() {
                        // Empty body: a document with no tokens
                        self.root = Root::Done;
                        return Ok(None);
                    }
                    self.root = Root::Open;
                    None
                }
                Root::Open | Root::Done => {
                    return match self.peek_significant()? {
                        None => Ok(None),
                        Some(byte) => Err(self.syntax(format!(
                            "trailing character '{}' after document",
                            byte as char
                        ))),
                    };
                }
            },
            Some(Frame::Object { first }) => {
                match self.expect_significant()? {
                    b'}' => {
                        self.bump();
                        return self.close(Token::EndObject);
                    }
                    b',' if !first => self.bump(),
                    _ if first => {}
                    _ => return Err(self.syntax("expected ',' or '}' in object")),
                }
                let name = self.read_member_name()?;
                if let Some(Frame::Object { first }) = self.frames.last_mut() {
                    *first = false;
                }
                Some(PathSegment::Key(name))
            }
            Some(Frame::Array { len }) => {
                match self.expect_significant()? {
                    b']' => {
                        self.bump();
                        return self.close(Token::EndArray);
                    }
                    b',' if len > 0 => self.bump(),
                    _ if len == 0 => {}
                    _ => return Err(self.syntax("expected ',' or ']' in array")),
                }
                if let Some(Frame::Array { len }) = self.frames.last_mut() {
                    *len += 1;
                }
                Some(PathSegment::Index(len))
            }
        };

        self.read_value(segment)
    }

    fn path(&self) -> &[PathSegment] {
        &self.path
    }

    fn bytes_read(&self) -> u64 {
        self.offset
    }
}
