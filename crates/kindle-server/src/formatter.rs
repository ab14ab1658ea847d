//! Translation of engine deltas into wire events.
//!
//! One [`StreamFormatter`] serves exactly one generation attempt. It emits an
//! [`WireEvent::AnswerPart`] per non-empty fragment and a single
//! [`WireEvent::Done`] when the engine reports completion, or when the delta
//! stream simply ends. Nothing is read or emitted after `Done`.

use futures::stream::{Stream, StreamExt};
use kindle_engine::{DeltaStream, EngineError, OutputDelta};
use serde::Serialize;

/// One event of the client-facing stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// An incremental fragment of the answer.
    AnswerPart { data: String },
    /// Always the last event of a successful stream.
    Done,
}

impl WireEvent {
    pub fn answer_part(data: impl Into<String>) -> Self {
        WireEvent::AnswerPart { data: data.into() }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, WireEvent::Done)
    }
}

/// Per-stream formatting state.
#[derive(Debug, Default)]
pub struct StreamFormatter {
    fragments: usize,
    last_fragment: Option<String>,
    done: bool,
}

impl StreamFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format one delta. Returns at most two events, in emission order.
    pub fn push(&mut self, delta: OutputDelta) -> Vec<WireEvent> {
        let mut events = Vec::with_capacity(2);
        if self.done {
            return events;
        }
        if !delta.text.is_empty() {
            self.fragments += 1;
            self.last_fragment = Some(delta.text.clone());
            events.push(WireEvent::AnswerPart { data: delta.text });
        }
        if delta.is_final {
            self.done = true;
            events.push(WireEvent::Done);
        }
        events
    }

    /// End of input. Yields `Done` unless one was already emitted.
    pub fn finish(&mut self) -> Option<WireEvent> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(WireEvent::Done)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of `AnswerPart` events emitted so far.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn last_fragment(&self) -> Option<&str> {
        self.last_fragment.as_deref()
    }
}

/// Format a whole delta stream.
///
/// Pull-based: a delta is read from the engine only when the consumer asks
/// for the next event. An engine error is passed through and ends the stream
/// without a `Done`.
pub fn format_stream(deltas: DeltaStream) -> impl Stream<Item = Result<WireEvent, EngineError>> {
    async_stream::stream! {
        let mut deltas = deltas;
        let mut formatter = StreamFormatter::new();
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(delta) => {
                    for event in formatter.push(delta) {
                        yield Ok(event);
                    }
                    if formatter.is_done() {
                        return;
                    }
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
        if let Some(done) = formatter.finish() {
            tracing::debug!(fragments = formatter.fragments(), "delta stream ended without a final marker");
            yield Ok(done);
        }
    }
}
