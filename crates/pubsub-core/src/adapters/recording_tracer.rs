//! Tracer that records span lifecycles in memory.
//!
//! Meant for tests that assert on span pairing: every begun span should be
//! finished exactly once, with the pipeline's outcome.

use crate::domain::{MessageSpan, SpanOutcome};
use crate::error::{ErrorCode, TraceError};
use crate::ports::{SpanHandle, Tracer};
use parking_lot::Mutex;

/// Outcome captured when a span is finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOutcome {
    Ok,
    Err { code: ErrorCode, message: String },
    Cancelled,
}

/// One span as seen by the recorder.
#[derive(Debug, Clone)]
pub struct RecordedSpan {
    pub id: u64,
    pub request: MessageSpan,
    /// Last outcome the span was finished with.
    pub outcome: Option<RecordedOutcome>,
    /// How many times the span was finished.
    pub finish_count: u32,
}

#[derive(Debug, Default)]
pub struct RecordingTracer {
    spans: Mutex<Vec<RecordedSpan>>,
    fail_begin: bool,
    active_trace: bool,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracer whose `begin_span` always fails.
    pub fn failing_begin() -> Self {
        Self {
            fail_begin: true,
            ..Self::default()
        }
    }

    /// A tracer that reports the caller is already inside a delivery trace.
    pub fn inside_active_trace() -> Self {
        Self {
            active_trace: true,
            ..Self::default()
        }
    }

    /// Snapshot of every span begun so far.
    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.spans.lock().clone()
    }

    pub fn begun(&self) -> usize {
        self.spans.lock().len()
    }

    /// Spans begun but never finished.
    pub fn open_spans(&self) -> usize {
        self.spans.lock().iter().filter(|s| s.finish_count == 0).count()
    }
}

impl Tracer for RecordingTracer {
    fn in_active_trace(&self) -> bool {
        self.active_trace
    }

    fn begin_span(&self, request: &MessageSpan) -> Result<SpanHandle, TraceError> {
        if self.fail_begin {
            return Err(TraceError::Begin("trace collector unavailable".into()));
        }

        let mut spans = self.spans.lock();
        let id = spans.len() as u64 + 1;
        spans.push(RecordedSpan {
            id,
            request: request.clone(),
            outcome: None,
            finish_count: 0,
        });
        Ok(SpanHandle::new(id, tracing::Span::none()))
    }

    fn finish_span(&self, handle: SpanHandle, outcome: SpanOutcome<'_>) {
        let recorded = match outcome {
            SpanOutcome::Ok => RecordedOutcome::Ok,
            SpanOutcome::Err(err) => RecordedOutcome::Err {
                code: err.code(),
                message: err.to_string(),
            },
            SpanOutcome::Cancelled => RecordedOutcome::Cancelled,
        };

        let mut spans = self.spans.lock();
        if let Some(span) = spans.iter_mut().find(|s| s.id == handle.id()) {
            span.outcome = Some(recorded);
            span.finish_count += 1;
        }
    }
}
