//! Lazy row sequences

use crate::envelope::EnvelopeStateMachine;
use qenv_format::constants::FIELD_RESULTS;
use qenv_format::{QenvError, Result, TokenCursor};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tracing::warn;

/// Single-pass stream of decoded rows straight off the cursor.
///
/// When the `results` array closes, or the stream is dropped early, the
/// envelope is drained so fields after the rows become available.
pub struct RowStream<'a, T, C: TokenCursor> {
    machine: &'a mut EnvelopeStateMachine<C>,
    index: usize,
    done: bool,
    complete: bool,
    _row: PhantomData<fn() -> T>,
}

impl<'a, T, C: TokenCursor> RowStream<'a, T, C> {
    pub(crate) fn new(machine: &'a mut EnvelopeStateMachine<C>) -> Result<Self> {
        let has_rows = machine.begin_rows()?;
        Ok(Self {
            machine,
            index: 0,
            done: !has_rows,
            complete: !has_rows,
            _row: PhantomData,
        })
    }

    /// Rows produced so far
    pub fn rows_read(&self) -> usize {
        self.index
    }

    /// Whether the `results` array has been read to its end. An error
    /// yielded after this point came from a field following the rows.
    pub fn rows_complete(&self) -> bool {
        self.complete
    }

    fn finish(&mut self) -> Result<()> {
        self.done = true;
        self.machine.drain_trailing()
    }
}

impl<'a, T: DeserializeOwned, C: TokenCursor> Iterator for RowStream<'a, T, C> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.machine.next_row_value() {
            Ok(Some(value)) => {
                let index = self.index;
                self.index += 1;
                match serde_json::from_value::<T>(value) {
                    Ok(row) => Some(Ok(row)),
                    Err(source) => {
                        if let Err(err) = self.finish() {
                            warn!(error = %err, "failed to drain envelope after row decode error");
                        }
                        Some(Err(QenvError::Decode {
                            section: FIELD_RESULTS,
                            index,
                            source,
                        }))
                    }
                }
            }
            Ok(None) => {
                self.complete = true;
                match self.finish() {
                    Ok(()) => None,
                    Err(err) => Some(Err(err)),
                }
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<'a, T, C: TokenCursor> Drop for RowStream<'a, T, C> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(err) = self.finish() {
                warn!(
                    error = %err,
                    rows_read = self.index,
                    "failed to drain envelope after abandoned row stream"
                );
            }
        }
    }
}

/// Rows of a [`ResultView`](crate::ResultView): streamed on the first and
/// only draw, or replayed from the materialized cache.
pub struct RowSequence<'a, T, C: TokenCursor> {
    inner: RowSource<'a, T, C>,
}

enum RowSource<'a, T, C: TokenCursor> {
    Streaming(RowStream<'a, T, C>),
    Cached(std::slice::Iter<'a, T>),
}

impl<'a, T, C: TokenCursor> RowSequence<'a, T, C> {
    pub(crate) fn streaming(stream: RowStream<'a, T, C>) -> Self {
        Self {
            inner: RowSource::Streaming(stream),
        }
    }

    pub(crate) fn cached(rows: &'a [T]) -> Self {
        Self {
            inner: RowSource::Cached(rows.iter()),
        }
    }

    /// Whether rows come from the materialized cache
    pub fn is_replay(&self) -> bool {
        matches!(self.inner, RowSource::Cached(_))
    }
}

impl<'a, T: DeserializeOwned + Clone, C: TokenCursor> Iterator for RowSequence<'a, T, C> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            RowSource::Streaming(stream) => stream.next(),
            RowSource::Cached(rows) => rows.next().cloned().map(Ok),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            RowSource::Streaming(_) => (0, None),
            RowSource::Cached(rows) => rows.size_hint(),
        }
    }
}
