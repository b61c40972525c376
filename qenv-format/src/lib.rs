//! qenv Format - Core primitives for query-service response envelopes
//!
//! This crate provides the building blocks shared by the reader and the CLI,
//! with no I/O dependencies. It includes:
//!
//! - Envelope field names and constants
//! - Header attribute types (status, metrics, diagnostics)
//! - The structural token model and the [`TokenCursor`] seam
//! - Retry classification
//! - Error types
//! - Reader limits

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod header;
pub mod limits;
pub mod retry;
pub mod status;
pub mod token;

// Re-export commonly used types
pub use error::{QenvError, Result};
pub use header::{Diagnostic, HeaderAttributes, Metrics};
pub use limits::Limits;
pub use retry::should_retry;
pub use status::{Status, UnknownStatus};
pub use token::{format_path, PathSegment, Token, TokenCursor};

/// Opaque structured value used for `signature` and `profile`
pub use serde_json::Value;
