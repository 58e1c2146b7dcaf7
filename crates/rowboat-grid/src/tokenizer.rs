use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GridError, GridResult};

/// Receives cell and row boundaries from a [`CellWriter`].
///
/// A sink that reports itself as saturated stops receiving events; the
/// writer discards further input without buffering it.
pub trait RowSink {
    fn on_cell(&mut self, value: String);
    fn on_row(&mut self);

    fn is_saturated(&self) -> bool {
        false
    }
}

/// A cancellation flag shared between an in-flight invocation and the
/// caller that may cancel it.
///
/// Once set, every writer carrying the flag rejects further input with
/// [`GridError::Aborted`]. The owner clears the flag before arming the
/// next invocation.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    aborted: Arc<AtomicBool>,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.aborted.store(false, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Disabled,
    Closed,
}

/// Splits a byte stream into cells and rows and feeds them to a [`RowSink`].
///
/// A separator byte ends the current cell. Any run of consecutive `\r` and
/// `\n` bytes ends the current cell and collapses into a single row
/// boundary, so `\r\n` line endings and blank lines do not produce empty
/// rows. In line mode (no separator) each row carries the whole line as its
/// only cell.
pub struct CellWriter<S: RowSink> {
    sink: S,
    separator: Option<u8>,
    abort: AbortFlag,
    pending: Vec<u8>,
    last_was_break: bool,
    gate: Gate,
}

impl<S: RowSink> CellWriter<S> {
    /// A writer that splits rows into cells at `separator`.
    pub fn cells(sink: S, separator: u8, abort: AbortFlag) -> Self {
        Self::with_gate(sink, Some(separator), abort, Gate::Open)
    }

    /// A writer that emits each line as a single-cell row.
    pub fn lines(sink: S, abort: AbortFlag) -> Self {
        Self::with_gate(sink, None, abort, Gate::Open)
    }

    /// A writer that rejects all input with [`GridError::OutputDisabled`],
    /// for invocations that must not produce output on this stream.
    pub fn disabled(sink: S, abort: AbortFlag) -> Self {
        Self::with_gate(sink, None, abort, Gate::Disabled)
    }

    fn with_gate(sink: S, separator: Option<u8>, abort: AbortFlag, gate: Gate) -> Self {
        Self {
            sink,
            separator,
            abort,
            pending: Vec::new(),
            last_was_break: false,
            gate,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> GridResult<()> {
        match self.gate {
            Gate::Open => {}
            Gate::Disabled => return Err(GridError::OutputDisabled),
            Gate::Closed => return Err(GridError::StreamClosed),
        }
        if self.abort.is_aborted() {
            return Err(GridError::Aborted);
        }
        for &byte in bytes {
            if self.sink.is_saturated() {
                break;
            }
            self.put(byte);
        }
        Ok(())
    }

    fn put(&mut self, byte: u8) {
        if byte == b'\r' || byte == b'\n' {
            if !self.last_was_break {
                self.flush_cell();
                self.sink.on_row();
            }
            self.last_was_break = true;
            return;
        }
        self.last_was_break = false;
        if self.separator == Some(byte) {
            self.flush_cell();
        } else {
            self.pending.push(byte);
        }
    }

    fn flush_cell(&mut self) {
        let value = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.sink.on_cell(value);
    }

    /// Closes the writer. A non-empty pending buffer is flushed as a final
    /// cell, unless the invocation was aborted, in which case it is
    /// discarded. Closing is idempotent and remains legal after an abort.
    pub fn close(&mut self) {
        if self.gate == Gate::Closed {
            return;
        }
        if self.gate == Gate::Open && !self.abort.is_aborted() && !self.pending.is_empty() {
            self.flush_cell();
        }
        self.pending.clear();
        self.gate = Gate::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.gate == Gate::Closed
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
