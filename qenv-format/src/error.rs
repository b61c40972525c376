//! Error types for qenv

use thiserror::Error;

/// qenv error types
#[derive(Debug, Error)]
pub enum QenvError {
    /// I/O operation failed while reading the response stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The response body is not well-formed JSON.
    #[error("Syntax error at byte {offset}: {message}")]
    Syntax {
        /// Byte offset into the stream where the problem was detected
        offset: u64,
        /// Description of the problem
        message: String,
    },
    /// The stream ended before the envelope was complete.
    #[error("Unexpected end of stream at byte {offset}")]
    UnexpectedEof {
        /// Number of bytes consumed before the stream ended
        offset: u64,
    },
    /// The object mapper could not convert an element into the target type.
    #[error("Failed to decode {section} element {index}: {source}")]
    Decode {
        /// Envelope section the element belongs to (`results`, `warnings`, `errors`)
        section: &'static str,
        /// Zero-based position of the element inside its array
        index: usize,
        /// Underlying mapper error
        #[source]
        source: serde_json::Error,
    },
    /// The row sequence was requested a second time without materialization.
    #[error("Row sequence has already been drawn; call materialize() before the first draw to iterate more than once")]
    RowsAlreadyDrawn,
    /// Rows were requested after the response stream was released.
    #[error("Response stream has been disposed")]
    Disposed,
    /// A previous syntax or I/O failure left the stream in an unknown position.
    #[error("Response stream is faulted by an earlier read failure")]
    Faulted,
    /// A configured limit was exceeded.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    /// Configuration values are outside of the supported range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QenvError {
    /// Whether this error leaves the underlying cursor at an undefined position.
    ///
    /// Decode failures consume the offending element completely, so reading
    /// can resume; syntax and transport failures cannot.
    pub fn is_fatal_to_stream(&self) -> bool {
        matches!(
            self,
            QenvError::Io(_)
                | QenvError::Syntax { .. }
                | QenvError::UnexpectedEof { .. }
                | QenvError::LimitExceeded(_)
                | QenvError::Internal(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, QenvError>;
