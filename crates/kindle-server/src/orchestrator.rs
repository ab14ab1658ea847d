//! Per-request generation with a single retry.
//!
//! A generation validates the prompt, borrows the engine from
//! [`EngineLifecycle`] and streams formatted events back. When the engine
//! fails, either while starting or mid-stream, the handle is invalidated and
//! the whole answer is generated once more from the start on a freshly
//! acquired engine. A second failure ends the request with
//! [`ServerError::EngineUnavailable`].

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use kindle_engine::{DeltaStream, EngineError, GenerationRequest, InferenceEngine};
use kindle_runtime::{GenerationOutcome, GenerationTimer, TelemetryHook, TracingTelemetry};
use kindle_sampling::SamplingConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServerError;
use crate::formatter::{format_stream, WireEvent};
use crate::lifecycle::{EngineHandle, EngineLifecycle};

/// Events of one generation. An `Err` item is always the last one.
pub type EventStream = BoxStream<'static, Result<WireEvent, ServerError>>;

/// Attempts per request, the first one included.
const MAX_ATTEMPTS: u32 = 2;

#[derive(Clone)]
pub struct Orchestrator {
    lifecycle: Arc<EngineLifecycle>,
    sampling: SamplingConfig,
    telemetry: Arc<dyn TelemetryHook>,
}

struct Attempt {
    number: u32,
    handle: EngineHandle,
    request_id: Uuid,
    deltas: DeltaStream,
}

/// Tells the engine to stop a generation that is dropped before it finished.
struct AbortOnDrop {
    engine: Arc<dyn InferenceEngine>,
    request_id: Uuid,
    armed: bool,
}

impl AbortOnDrop {
    fn new(engine: Arc<dyn InferenceEngine>, request_id: Uuid) -> Self {
        Self {
            engine,
            request_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!(request_id = %self.request_id, "aborting unfinished generation");
            self.engine.abort(self.request_id);
        }
    }
}

/// Trimmed prompt, or `InvalidRequest` if nothing is left.
pub fn validate_prompt(prompt: &str) -> Result<String, ServerError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(ServerError::InvalidRequest(
            "prompt must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

impl Orchestrator {
    /// `sampling` is used for every user-facing generation.
    pub fn new(lifecycle: Arc<EngineLifecycle>, sampling: SamplingConfig) -> Self {
        Self {
            lifecycle,
            sampling,
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn lifecycle(&self) -> &Arc<EngineLifecycle> {
        &self.lifecycle
    }

    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    /// Start a generation for `prompt`.
    ///
    /// Errors before the first event (bad prompt, engine that cannot be
    /// built, both attempts refused) are returned directly. Later failures
    /// arrive as the final item of the stream. Cancelling `cancel` aborts
    /// the generation on the engine and ends the stream with
    /// [`ServerError::ShuttingDown`].
    pub async fn generate(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream, ServerError> {
        let prompt = validate_prompt(prompt)?;
        let handle = self.lifecycle.acquire().await?;

        let first = match self.start(handle, &prompt, 1).await {
            Ok(attempt) => attempt,
            Err((handle, err)) => {
                warn!(attempt = 1, error = %err, "engine refused generation, retrying");
                self.lifecycle.invalidate(&handle);
                self.retry(&prompt).await?
            }
        };

        Ok(self.clone().drive(prompt, first, cancel).boxed())
    }

    async fn start(
        &self,
        handle: EngineHandle,
        prompt: &str,
        number: u32,
    ) -> Result<Attempt, (EngineHandle, EngineError)> {
        let request = GenerationRequest::new(prompt, self.sampling.clone());
        debug!(
            request_id = %request.id,
            attempt = number,
            epoch = handle.epoch(),
            "starting generation"
        );
        match handle.engine().generate(&request).await {
            Ok(deltas) => Ok(Attempt {
                number,
                handle,
                request_id: request.id,
                deltas,
            }),
            Err(err) => Err((handle, err)),
        }
    }

    /// Second and last attempt, on a re-acquired engine.
    async fn retry(&self, prompt: &str) -> Result<Attempt, ServerError> {
        let handle = self
            .lifecycle
            .acquire()
            .await
            .map_err(|e| ServerError::EngineUnavailable(format!("reconnect failed: {e}")))?;
        self.start(handle, prompt, MAX_ATTEMPTS)
            .await
            .map_err(|(handle, err)| {
                warn!(attempt = MAX_ATTEMPTS, error = %err, "retry refused");
                self.lifecycle.invalidate(&handle);
                ServerError::EngineUnavailable(err.to_string())
            })
    }

    fn drive(
        self,
        prompt: String,
        first: Attempt,
        cancel: CancellationToken,
    ) -> impl futures::Stream<Item = Result<WireEvent, ServerError>> {
        async_stream::stream! {
            let mut attempt = first;
            loop {
                let Attempt { number, handle, request_id, deltas } = attempt;
                let mut guard = AbortOnDrop::new(handle.engine().clone(), request_id);
                let mut timer = GenerationTimer::new(request_id, number, self.telemetry.clone());
                let mut events = Box::pin(format_stream(deltas));

                let failure = loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        item = events.next() => Some(item),
                    };
                    match next {
                        None => {
                            debug!(%request_id, "generation cancelled");
                            timer.finish(GenerationOutcome::Cancelled);
                            yield Err(ServerError::ShuttingDown);
                            return;
                        }
                        Some(Some(Ok(event))) => {
                            let done = event.is_done();
                            if !done {
                                timer.mark_fragment();
                            }
                            yield Ok(event);
                            if done {
                                guard.disarm();
                                timer.finish(GenerationOutcome::Completed);
                                return;
                            }
                        }
                        Some(Some(Err(err))) => break err,
                        // The formatter always closes with `Done`.
                        Some(None) => {
                            guard.disarm();
                            timer.finish(GenerationOutcome::Completed);
                            return;
                        }
                    }
                };

                guard.disarm();
                timer.finish(GenerationOutcome::Failed);
                warn!(%request_id, attempt = number, error = %failure, "generation failed mid-stream");
                self.lifecycle.invalidate(&handle);

                if number >= MAX_ATTEMPTS {
                    yield Err(ServerError::EngineUnavailable(failure.to_string()));
                    return;
                }
                // Re-initialization can take minutes; stay responsive to cancellation.
                let retried = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    retried = self.retry(&prompt) => Some(retried),
                };
                match retried {
                    Some(Ok(next)) => attempt = next,
                    Some(Err(err)) => {
                        yield Err(err);
                        return;
                    }
                    None => {
                        debug!(%request_id, "generation cancelled before retry");
                        yield Err(ServerError::ShuttingDown);
                        return;
                    }
                }
            }
        }
    }
}
