//! Envelope state machine
//!
//! Drives a [`TokenCursor`] over a response envelope, filling
//! [`HeaderAttributes`] as fields go by. Reading stops when the `results`
//! array opens so rows can be streamed by the caller, and resumes afterwards
//! to pick up fields that follow the rows (typically `metrics`, `status` and
//! late diagnostics).
//!
//! Dispatch is keyed on the cursor path alone, so an interrupted read (for
//! example a diagnostic that fails to decode) resumes correctly on the next
//! call.
//!
//! The machine is single-owner: every transition takes `&mut self`. Share it
//! across threads only behind the caller's own lock.

use qenv_format::constants::{
    ELEMENT_DEPTH, FIELD_CLIENT_CONTEXT_ID, FIELD_ERRORS, FIELD_METRICS, FIELD_PROFILE,
    FIELD_REQUEST_ID, FIELD_RESULTS, FIELD_SIGNATURE, FIELD_STATUS, FIELD_WARNINGS, HEADER_DEPTH,
    METRIC_ELAPSED_TIME, METRIC_ERROR_COUNT, METRIC_EXECUTION_TIME, METRIC_MUTATION_COUNT,
    METRIC_RESULT_COUNT, METRIC_RESULT_SIZE, METRIC_SORT_COUNT, METRIC_WARNING_COUNT,
};
use qenv_format::{
    format_path, Diagnostic, HeaderAttributes, Limits, PathSegment, QenvError, Result, Status,
    Token, TokenCursor,
};
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

/// Where header parsing stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStop {
    /// Cursor sits just inside the `results` array
    AtRows,
    /// Envelope ended without a `results` array; trailing fields are parsed
    Finished,
}

/// Lifecycle of one response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No bytes read yet
    NotStarted,
    /// Header fields before `results` (or the whole envelope) are parsed
    HeaderParsed(HeaderStop),
    /// The row sequence has been drawn and is being consumed
    RowsStreaming,
    /// The `results` array has closed; trailing fields not yet read
    RowsStreamed,
    /// Rows were drawn and every trailing field has been read
    TrailingParsed,
    /// Rows were eagerly collected before any draw
    Materialized,
    /// A syntax or transport failure left the stream position undefined
    Faulted,
    /// The stream has been released
    Disposed,
}

impl ReaderState {
    /// Whether header fields preceding `results` are available
    pub fn header_ready(&self) -> bool {
        !matches!(self, ReaderState::NotStarted | ReaderState::Faulted)
    }

    /// Whether fields following `results` are available
    pub fn trailing_ready(&self) -> bool {
        matches!(
            self,
            ReaderState::HeaderParsed(HeaderStop::Finished)
                | ReaderState::TrailingParsed
                | ReaderState::Materialized
        )
    }
}

/// Top-level envelope members the machine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    RequestId,
    ClientContextId,
    Status,
    Signature,
    Profile,
    Metrics,
    Warnings,
    Errors,
    Results,
    Other,
}

impl Field {
    fn from_name(name: &str) -> Self {
        match name {
            FIELD_REQUEST_ID => Field::RequestId,
            FIELD_CLIENT_CONTEXT_ID => Field::ClientContextId,
            FIELD_STATUS => Field::Status,
            FIELD_SIGNATURE => Field::Signature,
            FIELD_PROFILE => Field::Profile,
            FIELD_METRICS => Field::Metrics,
            FIELD_WARNINGS => Field::Warnings,
            FIELD_ERRORS => Field::Errors,
            FIELD_RESULTS => Field::Results,
            _ => Field::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    ElapsedTime,
    ExecutionTime,
    ResultCount,
    ResultSize,
    ErrorCount,
    WarningCount,
    MutationCount,
    SortCount,
    Other,
}

impl Metric {
    fn from_name(name: &str) -> Self {
        match name {
            METRIC_ELAPSED_TIME => Metric::ElapsedTime,
            METRIC_EXECUTION_TIME => Metric::ExecutionTime,
            METRIC_RESULT_COUNT => Metric::ResultCount,
            METRIC_RESULT_SIZE => Metric::ResultSize,
            METRIC_ERROR_COUNT => Metric::ErrorCount,
            METRIC_WARNING_COUNT => Metric::WarningCount,
            METRIC_MUTATION_COUNT => Metric::MutationCount,
            METRIC_SORT_COUNT => Metric::SortCount,
            _ => Metric::Other,
        }
    }
}

/// Incremental reader for one response envelope
pub struct EnvelopeStateMachine<C: TokenCursor> {
    cursor: Option<C>,
    state: ReaderState,
    header: HeaderAttributes,
    limits: Limits,
}

impl<C: TokenCursor> EnvelopeStateMachine<C> {
    /// Bind a machine to an unread cursor. No I/O happens until the first
    /// call that needs it.
    pub fn new(cursor: C) -> Self {
        Self {
            cursor: Some(cursor),
            state: ReaderState::NotStarted,
            header: HeaderAttributes::default(),
            limits: Limits::default(),
        }
    }

    /// Bind a machine with explicit limits
    pub fn with_limits(cursor: C, limits: Limits) -> Result<Self> {
        limits.validate()?;
        let mut machine = Self::new(cursor);
        machine.limits = limits;
        Ok(machine)
    }

    /// A machine without a stream, reporting `header` as its final snapshot
    pub fn detached(header: HeaderAttributes) -> Self {
        Self {
            cursor: None,
            state: ReaderState::Disposed,
            header,
            limits: Limits::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Header attributes parsed so far, without triggering any I/O
    pub fn header(&self) -> &HeaderAttributes {
        &self.header
    }

    /// Bytes consumed from the stream, if it has not been released
    pub fn bytes_read(&self) -> Option<u64> {
        self.cursor.as_ref().map(TokenCursor::bytes_read)
    }

    /// Parse header fields up to the `results` array (or the envelope end).
    ///
    /// Idempotent: once the header is parsed this does nothing.
    pub fn ensure_header(&mut self) -> Result<()> {
        match self.state {
            ReaderState::NotStarted => {
                let stop = self.advance(true)?;
                self.state = ReaderState::HeaderParsed(stop);
                debug!(
                    ?stop,
                    status = ?self.header.status,
                    request_id = %self.header.request_id,
                    "envelope header parsed"
                );
                Ok(())
            }
            ReaderState::Faulted => Err(QenvError::Faulted),
            _ => Ok(()),
        }
    }

    /// Read everything after the rows up to the envelope end.
    ///
    /// Any row elements not yet consumed are skipped. Idempotent once the
    /// trailing fields are parsed.
    pub fn drain_trailing(&mut self) -> Result<()> {
        match self.state {
            ReaderState::NotStarted => {
                self.ensure_header()?;
                self.drain_trailing()
            }
            ReaderState::HeaderParsed(HeaderStop::AtRows)
            | ReaderState::RowsStreaming
            | ReaderState::RowsStreamed => {
                self.advance(false)?;
                self.state = ReaderState::TrailingParsed;
                debug!(
                    result_count = self.header.metrics.result_count,
                    status = ?self.header.status,
                    "envelope trailing fields parsed"
                );
                Ok(())
            }
            ReaderState::Faulted => Err(QenvError::Faulted),
            ReaderState::HeaderParsed(HeaderStop::Finished)
            | ReaderState::TrailingParsed
            | ReaderState::Materialized
            | ReaderState::Disposed => Ok(()),
        }
    }

    /// Claim the row array for a single draw.
    ///
    /// Returns `false` when the envelope has no `results` array.
    pub(crate) fn begin_rows(&mut self) -> Result<bool> {
        self.ensure_header()?;
        match self.state {
            ReaderState::HeaderParsed(HeaderStop::AtRows) => {
                self.state = ReaderState::RowsStreaming;
                Ok(true)
            }
            ReaderState::HeaderParsed(HeaderStop::Finished) => {
                self.state = ReaderState::TrailingParsed;
                Ok(false)
            }
            ReaderState::RowsStreaming
            | ReaderState::RowsStreamed
            | ReaderState::TrailingParsed
            | ReaderState::Materialized => Err(QenvError::RowsAlreadyDrawn),
            ReaderState::Disposed => Err(QenvError::Disposed),
            ReaderState::Faulted => Err(QenvError::Faulted),
            ReaderState::NotStarted => Err(QenvError::Internal(
                "row draw before header was parsed".to_string(),
            )),
        }
    }

    /// Next raw element of the row array, or `None` once the array closes.
    pub(crate) fn next_row_value(&mut self) -> Result<Option<Value>> {
        if self.state != ReaderState::RowsStreaming {
            return Ok(None);
        }
        let cursor = self.cursor.as_mut().ok_or(QenvError::Disposed)?;
        let result = read_row(cursor);
        match result {
            Ok(None) => {
                self.state = ReaderState::RowsStreamed;
                Ok(None)
            }
            other => self.check(other),
        }
    }

    pub(crate) fn mark_materialized(&mut self) {
        self.state = ReaderState::Materialized;
    }

    /// Release the stream. Safe to call repeatedly; the header snapshot is kept.
    pub fn dispose(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            debug!(
                bytes_read = cursor.bytes_read(),
                state = ?self.state,
                "releasing response stream"
            );
            drop(cursor);
        }
        self.state = ReaderState::Disposed;
    }

    fn advance(&mut self, stop_at_rows: bool) -> Result<HeaderStop> {
        let Self {
            cursor,
            header,
            limits,
            ..
        } = self;
        let Some(cursor) = cursor.as_mut() else {
            return Err(QenvError::Disposed);
        };
        let result = dispatch(cursor, header, limits, stop_at_rows);
        self.check(result)
    }

    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal_to_stream() {
                debug!(error = %err, "response stream faulted");
                self.state = ReaderState::Faulted;
            }
        }
        result
    }
}

impl<C: TokenCursor> Drop for EnvelopeStateMachine<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn read_row<C: TokenCursor>(cursor: &mut C) -> Result<Option<Value>> {
    let token = cursor.next_token()?.ok_or(QenvError::UnexpectedEof {
        offset: cursor.bytes_read(),
    })?;
    match cursor.depth() {
        HEADER_DEPTH if token == Token::EndArray => Ok(None),
        ELEMENT_DEPTH => cursor.capture(token).map(Some),
        _ => Err(QenvError::Internal(format!(
            "unexpected {:?} at '{}' while reading rows",
            token,
            format_path(cursor.path())
        ))),
    }
}

fn element_index(path: &[PathSegment]) -> usize {
    match path.get(1) {
        Some(PathSegment::Index(idx)) => *idx,
        _ => 0,
    }
}

/// Route envelope tokens into `header` until `results` opens (when
/// `stop_at_rows`) or the envelope ends.
fn dispatch<C: TokenCursor>(
    cursor: &mut C,
    header: &mut HeaderAttributes,
    limits: &Limits,
    stop_at_rows: bool,
) -> Result<HeaderStop> {
    loop {
        let Some(token) = cursor.next_token()? else {
            return Ok(HeaderStop::Finished);
        };
        let depth = cursor.depth();

        if depth == 0 {
            match token {
                Token::StartObject | Token::EndObject => continue,
                _ => {
                    return Err(QenvError::Syntax {
                        offset: cursor.bytes_read(),
                        message: "response envelope is not a JSON object".to_string(),
                    })
                }
            }
        }

        let (field, metric) = {
            let path = cursor.path();
            let field = path
                .first()
                .and_then(PathSegment::as_key)
                .map_or(Field::Other, Field::from_name);
            let metric = path
                .get(1)
                .and_then(PathSegment::as_key)
                .map_or(Metric::Other, Metric::from_name);
            (field, metric)
        };

        if depth == HEADER_DEPTH {
            match (field, token) {
                (Field::Results, Token::StartArray) => {
                    if stop_at_rows {
                        return Ok(HeaderStop::AtRows);
                    }
                    trace!("skipping repeated results array");
                    cursor.skip(&Token::StartArray)?;
                }
                (Field::RequestId, Token::String(raw)) => match Uuid::parse_str(&raw) {
                    Ok(id) => header.request_id = id,
                    Err(err) => trace!(%raw, %err, "ignoring malformed requestID"),
                },
                (Field::Status, Token::String(raw)) => match raw.parse::<Status>() {
                    Ok(status) => header.set_status(status),
                    Err(err) => trace!(%err, "ignoring unrecognised status"),
                },
                (Field::ClientContextId, Token::String(raw)) => {
                    header.client_context_id = Some(raw);
                }
                (Field::Signature, token) => header.signature = Some(cursor.capture(token)?),
                (Field::Profile, token) => header.profile = Some(cursor.capture(token)?),
                (Field::Metrics, Token::StartObject | Token::EndObject)
                | (Field::Warnings | Field::Errors, Token::StartArray | Token::EndArray)
                | (Field::Results, Token::EndArray) => {}
                (_, token) => {
                    trace!(path = %format_path(cursor.path()), "skipping envelope value");
                    cursor.skip(&token)?;
                }
            }
            continue;
        }

        if depth == ELEMENT_DEPTH {
            match field {
                Field::Results => cursor.skip(&token)?,
                Field::Warnings | Field::Errors => {
                    let (section, list) = if field == Field::Warnings {
                        (FIELD_WARNINGS, &mut header.warnings)
                    } else {
                        (FIELD_ERRORS, &mut header.errors)
                    };
                    let index = element_index(cursor.path());
                    let value = cursor.capture(token)?;
                    if list.len() >= limits.max_diagnostics {
                        return Err(QenvError::LimitExceeded(format!(
                            "more than {} {} in envelope",
                            limits.max_diagnostics, section
                        )));
                    }
                    let diagnostic = serde_json::from_value::<Diagnostic>(value).map_err(
                        |source| QenvError::Decode {
                            section,
                            index,
                            source,
                        },
                    )?;
                    list.push(diagnostic);
                }
                Field::Metrics => apply_metric(cursor, &mut header.metrics, metric, token)?,
                _ => cursor.skip(&token)?,
            }
            continue;
        }

        cursor.skip(&token)?;
    }
}

fn apply_metric<C: TokenCursor>(
    cursor: &mut C,
    metrics: &mut qenv_format::Metrics,
    metric: Metric,
    token: Token,
) -> Result<()> {
    let counter = match metric {
        Metric::ResultCount => Some(&mut metrics.result_count),
        Metric::ResultSize => Some(&mut metrics.result_size),
        Metric::ErrorCount => Some(&mut metrics.error_count),
        Metric::WarningCount => Some(&mut metrics.warning_count),
        Metric::MutationCount => Some(&mut metrics.mutation_count),
        Metric::SortCount => Some(&mut metrics.sort_count),
        Metric::ElapsedTime | Metric::ExecutionTime | Metric::Other => None,
    };

    match (metric, token) {
        (Metric::ElapsedTime, Token::String(raw)) => metrics.elapsed_time = raw,
        (Metric::ExecutionTime, Token::String(raw)) => metrics.execution_time = raw,
        (_, Token::Number(n)) if counter.is_some() => match (n.as_u64(), counter) {
            (Some(value), Some(slot)) => *slot = value,
            _ => trace!(%n, ?metric, "ignoring non-unsigned metric"),
        },
        (_, token) => {
            trace!(path = %format_path(cursor.path()), "skipping metric value");
            cursor.skip(&token)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::JsonCursor;

    fn machine(input: &str) -> EnvelopeStateMachine<JsonCursor<&[u8]>> {
        EnvelopeStateMachine::new(JsonCursor::new(input.as_bytes()))
    }

    #[test]
    fn test_header_stops_at_results() {
        let mut m = machine(
            r#"{"requestID":"11111111-1111-1111-1111-111111111111","status":"running","results":[1,2],"metrics":{"resultCount":2}}"#,
        );
        assert_eq!(m.state(), ReaderState::NotStarted);
        assert_eq!(m.bytes_read(), Some(0));

        m.ensure_header().unwrap();
        assert_eq!(m.state(), ReaderState::HeaderParsed(HeaderStop::AtRows));
        assert_eq!(m.header().status, Some(Status::Running));
        assert_eq!(
            m.header().request_id.to_string(),
            "11111111-1111-1111-1111-111111111111"
        );
        assert_eq!(m.header().metrics.result_count, 0);

        let consumed = m.bytes_read();
        m.ensure_header().unwrap();
        assert_eq!(m.bytes_read(), consumed);
    }

    #[test]
    fn test_drain_skips_unread_rows() {
        let mut m = machine(r#"{"results":[{"a":[1,2]},{"b":{}}],"status":"success","metrics":{"resultCount":2,"resultSize":17}}"#);
        m.ensure_header().unwrap();
        m.drain_trailing().unwrap();
        assert_eq!(m.state(), ReaderState::TrailingParsed);
        assert!(m.header().success);
        assert_eq!(m.header().metrics.result_count, 2);
        assert_eq!(m.header().metrics.result_size, 17);
    }

    #[test]
    fn test_envelope_without_results_finishes() {
        let mut m = machine(r#"{"status":"errors","errors":[{"code":4100,"msg":"bad"}]}"#);
        m.ensure_header().unwrap();
        assert_eq!(m.state(), ReaderState::HeaderParsed(HeaderStop::Finished));
        assert!(m.state().trailing_ready());
        assert_eq!(m.header().errors, vec![Diagnostic::new(4100, "bad")]);
        assert!(!m.header().success);
    }

    #[test]
    fn test_metrics_and_opaque_fields() {
        let mut m = machine(
            r#"{"signature":{"*":"*"},"profile":[1,2],"clientContextID":"ctx-1","metrics":{"elapsedTime":"1.5ms","executionTime":"1.2ms","resultCount":3,"resultSize":99,"errorCount":1,"warningCount":2,"mutationCount":4,"sortCount":5,"extra":{"x":1}}}"#,
        );
        m.ensure_header().unwrap();
        let header = m.header();
        assert_eq!(header.signature, Some(serde_json::json!({"*": "*"})));
        assert_eq!(header.profile, Some(serde_json::json!([1, 2])));
        assert_eq!(header.client_context_id.as_deref(), Some("ctx-1"));
        assert_eq!(header.metrics.elapsed_time, "1.5ms");
        assert_eq!(header.metrics.execution_time, "1.2ms");
        assert_eq!(header.metrics.result_count, 3);
        assert_eq!(header.metrics.result_size, 99);
        assert_eq!(header.metrics.error_count, 1);
        assert_eq!(header.metrics.warning_count, 2);
        assert_eq!(header.metrics.mutation_count, 4);
        assert_eq!(header.metrics.sort_count, 5);
    }

    #[test]
    fn test_lenient_scalars_keep_defaults() {
        let mut m = machine(
            r#"{"requestID":"not-a-uuid","status":"exploded","metrics":{"resultCount":-4,"resultSize":"12","elapsedTime":7},"clientContextID":"c"}"#,
        );
        m.ensure_header().unwrap();
        let header = m.header();
        assert!(header.request_id.is_nil());
        assert_eq!(header.status, None);
        assert!(!header.success);
        assert_eq!(header.metrics.result_count, 0);
        assert_eq!(header.metrics.result_size, 0);
        assert_eq!(header.metrics.elapsed_time, "");
        assert_eq!(header.client_context_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_wrongly_typed_sections_are_skipped() {
        let mut m = machine(
            r#"{"metrics":[1,2],"warnings":{"code":1},"results":"none","status":"success"}"#,
        );
        m.ensure_header().unwrap();
        assert_eq!(m.state(), ReaderState::HeaderParsed(HeaderStop::Finished));
        assert!(m.header().warnings.is_empty());
        assert_eq!(m.header().status, Some(Status::Success));
    }

    #[test]
    fn test_bad_diagnostic_is_decode_error_and_resumable() {
        let mut m = machine(
            r#"{"warnings":[{"msg":"no code"},{"code":2,"msg":"ok"}],"status":"success"}"#,
        );
        let err = m.ensure_header().unwrap_err();
        assert!(matches!(
            err,
            QenvError::Decode {
                section: "warnings",
                index: 0,
                ..
            }
        ));
        assert_eq!(m.state(), ReaderState::NotStarted);

        m.ensure_header().unwrap();
        assert_eq!(m.header().warnings, vec![Diagnostic::new(2, "ok")]);
        assert!(m.header().success);
    }

    #[test]
    fn test_syntax_error_faults_machine() {
        let mut m = machine(r#"{"status":"success" "results":[]}"#);
        assert!(matches!(m.ensure_header(), Err(QenvError::Syntax { .. })));
        assert_eq!(m.state(), ReaderState::Faulted);
        assert!(matches!(m.ensure_header(), Err(QenvError::Faulted)));
    }

    #[test]
    fn test_non_object_envelope_rejected() {
        let mut m = machine("[1,2,3]");
        assert!(matches!(m.ensure_header(), Err(QenvError::Syntax { .. })));
    }

    #[test]
    fn test_diagnostic_limit() {
        let mut m = EnvelopeStateMachine::with_limits(
            JsonCursor::new(r#"{"errors":[{"code":1},{"code":2}]}"#.as_bytes()),
            Limits {
                max_diagnostics: 1,
                ..Limits::default()
            },
        )
        .unwrap();
        assert!(matches!(
            m.ensure_header(),
            Err(QenvError::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_empty_body_finishes_without_fields() {
        let mut m = machine("");
        assert!(!m.state().header_ready());
        m.ensure_header().unwrap();
        assert_eq!(m.state(), ReaderState::HeaderParsed(HeaderStop::Finished));
        assert!(m.state().header_ready());
        assert_eq!(m.header(), &HeaderAttributes::default());
    }

    #[test]
    fn test_trailing_decode_failure_resumes() {
        let mut m = machine(
            r#"{"status":"running","results":[1],"errors":[{"msg":"no code"}],"status":"errors","metrics":{"resultCount":1}}"#,
        );
        assert!(m.begin_rows().unwrap());
        assert_eq!(m.next_row_value().unwrap(), Some(serde_json::json!(1)));
        assert_eq!(m.next_row_value().unwrap(), None);
        assert_eq!(m.state(), ReaderState::RowsStreamed);

        let err = m.drain_trailing().unwrap_err();
        assert!(matches!(
            err,
            QenvError::Decode {
                section: "errors",
                index: 0,
                ..
            }
        ));
        assert_eq!(m.state(), ReaderState::RowsStreamed);
        assert!(!m.state().trailing_ready());

        m.drain_trailing().unwrap();
        assert_eq!(m.state(), ReaderState::TrailingParsed);
        assert_eq!(m.header().status, Some(Status::Errors));
        assert_eq!(m.header().metrics.result_count, 1);
        assert!(m.header().errors.is_empty());
    }

    #[test]
    fn test_faulted_state_is_not_header_ready() {
        let mut m = machine(r#"{"status":"#);
        assert!(m.ensure_header().is_err());
        assert_eq!(m.state(), ReaderState::Faulted);
        assert!(!m.state().header_ready());
    }

    #[test]
    fn test_dispose_is_idempotent_and_keeps_snapshot() {
        let mut m = machine(r#"{"status":"success","results":[1]}"#);
        m.ensure_header().unwrap();
        m.dispose();
        m.dispose();
        assert_eq!(m.state(), ReaderState::Disposed);
        assert_eq!(m.bytes_read(), None);
        assert!(m.ensure_header().is_ok());
        assert!(m.drain_trailing().is_ok());
        assert_eq!(m.header().status, Some(Status::Success));
    }
}
