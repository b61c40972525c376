//! qenv I/O - Streaming reader for query-service response envelopes
//!
//! This crate provides the reading layer on top of `qenv-format`:
//!
//! - A streaming JSON token cursor over any [`std::io::Read`]
//! - The envelope state machine that extracts header attributes
//! - Lazy, single-pass row sequences with drain-on-drop
//! - [`ResultView`], the aggregate handed to callers
//!
//! ```
//! use qenv_io::ResultView;
//! use serde_json::Value;
//!
//! let body = br#"{"status":"success","results":[{"a":1},{"a":2}],"metrics":{"resultCount":2}}"#;
//! let mut view: ResultView<Value, _> = ResultView::from_reader(&body[..]);
//!
//! let rows: Vec<Value> = view.rows()?.collect::<Result<_, _>>()?;
//! assert_eq!(rows.len(), 2);
//! assert_eq!(view.metrics()?.result_count, 2);
//! assert!(view.success()?);
//! # Ok::<(), qenv_io::QenvError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cursor;
pub mod envelope;
pub mod rows;
pub mod view;

// Re-export commonly used types
pub use cursor::JsonCursor;
pub use envelope::{EnvelopeStateMachine, HeaderStop, ReaderState};
pub use qenv_format::{
    should_retry, Diagnostic, HeaderAttributes, Limits, Metrics, QenvError, Result, Status,
    TokenCursor,
};
pub use rows::{RowSequence, RowStream};
pub use view::{ResultView, TransportError, TransportInfo};

use std::io::Read;

/// Open a view over a JSON response body using default limits
pub fn open<T, R: Read>(reader: R) -> ResultView<T, JsonCursor<R>> {
    ResultView::from_reader(reader)
}
