//! Public result view over one response envelope

use crate::cursor::JsonCursor;
use crate::envelope::{EnvelopeStateMachine, ReaderState};
use crate::rows::{RowSequence, RowStream};
use qenv_format::{
    should_retry, Diagnostic, HeaderAttributes, Limits, Metrics, QenvError, Result, Status,
    TokenCursor,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::io::Read;
use tracing::debug;
use uuid::Uuid;

/// Error captured by the request executor
pub type TransportError = Box<dyn StdError + Send + Sync>;

/// Fields supplied by the request executor rather than the envelope
#[derive(Default)]
pub struct TransportInfo {
    /// HTTP status code; 0 when no response code was received
    pub status_code: u16,
    /// Human-readable message describing the exchange
    pub message: Option<String>,
    /// Error raised while sending the request or reading the response
    pub error: Option<TransportError>,
}

impl fmt::Debug for TransportInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportInfo")
            .field("status_code", &self.status_code)
            .field("message", &self.message)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// Typed rows plus header attributes of one query response.
///
/// Nothing is read from the stream until a header attribute or the rows are
/// requested. Header getters parse up to the row array on first use; fields
/// that follow the rows in the envelope (usually `metrics`) keep their
/// defaults until the rows have been drained or materialized.
///
/// A view is meant for a single owner. All reading goes through `&mut self`;
/// wrap it in a `Mutex` to hand it between threads.
pub struct ResultView<T, C: TokenCursor> {
    machine: EnvelopeStateMachine<C>,
    cache: Option<Vec<T>>,
    transport: TransportInfo,
}

impl<T, R: Read> ResultView<T, JsonCursor<R>> {
    /// View over an unread JSON response body
    pub fn from_reader(reader: R) -> Self {
        Self::new(JsonCursor::new(reader))
    }

    /// View over an unread JSON response body with explicit limits
    pub fn from_reader_with_limits(reader: R, limits: Limits) -> Result<Self> {
        let cursor = JsonCursor::with_limits(reader, limits.clone())?;
        Self::with_limits(cursor, limits)
    }
}

impl<T, C: TokenCursor> ResultView<T, C> {
    /// View over an unread token cursor
    pub fn new(cursor: C) -> Self {
        Self::from_machine(EnvelopeStateMachine::new(cursor))
    }

    /// View over an unread token cursor with explicit limits
    pub fn with_limits(cursor: C, limits: Limits) -> Result<Self> {
        Ok(Self::from_machine(EnvelopeStateMachine::with_limits(
            cursor, limits,
        )?))
    }

    /// View for a request that failed before any body was received.
    ///
    /// The status is `Fatal` and no rows are available.
    pub fn transport_failure(
        status_code: u16,
        message: impl Into<String>,
        error: Option<TransportError>,
    ) -> Self {
        let mut header = HeaderAttributes::default();
        header.set_status(Status::Fatal);
        Self {
            machine: EnvelopeStateMachine::detached(header),
            cache: None,
            transport: TransportInfo {
                status_code,
                message: Some(message.into()),
                error,
            },
        }
    }

    fn from_machine(machine: EnvelopeStateMachine<C>) -> Self {
        Self {
            machine,
            cache: None,
            transport: TransportInfo::default(),
        }
    }

    /// Current reader state
    pub fn state(&self) -> ReaderState {
        self.machine.state()
    }

    /// Bytes consumed from the stream; `None` once it has been released
    pub fn bytes_read(&self) -> Option<u64> {
        self.machine.bytes_read()
    }

    /// Parse the header up to the row array. Idempotent.
    ///
    /// If an earlier draw stopped before the envelope end (a trailing
    /// diagnostic failed to decode, or the rows were abandoned and the drain
    /// failed), reading resumes here so fields after the rows still arrive.
    pub fn ensure_header(&mut self) -> Result<()> {
        self.machine.ensure_header()?;
        if matches!(
            self.machine.state(),
            ReaderState::RowsStreaming | ReaderState::RowsStreamed
        ) {
            self.machine.drain_trailing()?;
            if self.cache.is_some() {
                self.machine.mark_materialized();
            }
        }
        Ok(())
    }

    /// Header attributes as parsed so far, without triggering I/O
    pub fn snapshot(&self) -> &HeaderAttributes {
        self.machine.header()
    }

    /// All header attributes
    pub fn header(&mut self) -> Result<&HeaderAttributes> {
        self.ensure_header()?;
        Ok(self.machine.header())
    }

    /// Request identifier (nil when absent or malformed)
    pub fn request_id(&mut self) -> Result<Uuid> {
        Ok(self.header()?.request_id)
    }

    /// Client context identifier
    pub fn client_context_id(&mut self) -> Result<Option<&str>> {
        Ok(self.header()?.client_context_id.as_deref())
    }

    /// Opaque schema descriptor
    pub fn signature(&mut self) -> Result<Option<&Value>> {
        Ok(self.header()?.signature.as_ref())
    }

    /// Opaque execution profile
    pub fn profile(&mut self) -> Result<Option<&Value>> {
        Ok(self.header()?.profile.as_ref())
    }

    /// Parsed status, if the envelope carried a recognised one
    pub fn status(&mut self) -> Result<Option<Status>> {
        Ok(self.header()?.status)
    }

    /// True iff the status is `Success`
    pub fn success(&mut self) -> Result<bool> {
        Ok(self.header()?.success)
    }

    /// Warnings read so far
    pub fn warnings(&mut self) -> Result<&[Diagnostic]> {
        Ok(&self.header()?.warnings)
    }

    /// Errors read so far
    pub fn errors(&mut self) -> Result<&[Diagnostic]> {
        Ok(&self.header()?.errors)
    }

    /// Metrics read so far
    pub fn metrics(&mut self) -> Result<&Metrics> {
        Ok(&self.header()?.metrics)
    }

    /// Whether the request should be retried given its status and the
    /// transport status code.
    ///
    /// A faulted stream is classified from the status read before the fault.
    pub fn should_retry(&mut self) -> Result<bool> {
        let code = self.transport.status_code;
        let status = match self.ensure_header() {
            Ok(()) => self.machine.header().status,
            Err(err) if self.machine.state() == ReaderState::Faulted => {
                debug!(error = %err, "classifying retry from header snapshot");
                self.machine.header().status
            }
            Err(err) => return Err(err),
        };
        Ok(status.map_or(false, |status| should_retry(status, code)))
    }

    /// Executor-supplied transport fields
    pub fn transport(&self) -> &TransportInfo {
        &self.transport
    }

    /// Record the HTTP status code of the response
    pub fn set_transport_status_code(&mut self, code: u16) {
        self.transport.status_code = code;
    }

    /// Transport status code (0 when none was received)
    pub fn transport_status_code(&self) -> u16 {
        self.transport.status_code
    }

    /// Record a human-readable message about the exchange
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.transport.message = Some(message.into());
    }

    /// Executor-supplied message
    pub fn message(&self) -> Option<&str> {
        self.transport.message.as_deref()
    }

    /// Record the error that interrupted the exchange
    pub fn set_error(&mut self, error: impl Into<TransportError>) {
        self.transport.error = Some(error.into());
    }

    /// Executor-supplied error
    pub fn error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.transport.error.as_deref()
    }

    /// Release the response stream. Idempotent and infallible; header
    /// attributes keep their last parsed values and materialized rows stay
    /// available.
    pub fn dispose(&mut self) {
        self.machine.dispose();
    }
}

impl<T: DeserializeOwned, C: TokenCursor> ResultView<T, C> {
    /// Collect every row into an owned list so the rows can be drawn any
    /// number of times. Must happen before the first draw; once done, later
    /// calls return the same list.
    ///
    /// When every row decoded but a field after the rows failed, the rows are
    /// kept and the error is returned; calling again resumes the trailing
    /// fields.
    pub fn materialize(&mut self) -> Result<&[T]> {
        if self.cache.is_some() {
            self.ensure_header()?;
        } else {
            let mut stream = RowStream::new(&mut self.machine)?;
            let mut rows = Vec::new();
            let mut trailing = Ok(());
            while let Some(row) = stream.next() {
                match row {
                    Ok(row) => rows.push(row),
                    Err(err) if stream.rows_complete() => {
                        trailing = Err(err);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            debug!(rows = stream.rows_read(), "rows materialized");
            drop(stream);

            self.cache = Some(rows);
            trailing?;
            self.machine.mark_materialized();
        }
        Ok(self.cache.as_deref().unwrap_or(&[]))
    }
}

impl<T: DeserializeOwned + Clone, C: TokenCursor> ResultView<T, C> {
    /// Draw the rows.
    ///
    /// Without prior materialization this streams straight from the
    /// response and may be called once; a second call fails with
    /// [`QenvError::RowsAlreadyDrawn`]. After [`materialize`](Self::materialize)
    /// every call replays the cached rows.
    pub fn rows(&mut self) -> Result<RowSequence<'_, T, C>> {
        if let Some(rows) = self.cache.as_deref() {
            return Ok(RowSequence::cached(rows));
        }
        if self.machine.state() == ReaderState::Disposed {
            return Err(QenvError::Disposed);
        }
        Ok(RowSequence::streaming(RowStream::new(&mut self.machine)?))
    }
}

impl<T, C: TokenCursor> fmt::Debug for ResultView<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultView")
            .field("state", &self.machine.state())
            .field("header", self.machine.header())
            .field("cached_rows", &self.cache.as_ref().map(Vec::len))
            .field("transport", &self.transport)
            .finish()
    }
}
