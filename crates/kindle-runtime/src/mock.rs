//! Scripted in-process engine.
//!
//! [`MockEngineFactory`] builds [`MockEngine`]s that share one script and one
//! set of counters, so a test can arrange failures up front and inspect
//! afterwards how many engines were built, which requests reached them and
//! which were aborted. Without a script an engine echoes the prompt back one
//! word per delta.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kindle_engine::{
    DeltaStream, EngineError, EngineFactory, GenerationRequest, InferenceEngine, ModelSpec,
    OutputDelta, Result,
};
use kindle_sampling::SamplingConfig;
use uuid::Uuid;

/// Scripted behaviour for one generation.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Stream these deltas in order.
    Deltas(Vec<OutputDelta>),
    /// Reject the request before any output.
    RejectStart(EngineError),
    /// Stream `deltas`, then fail with `error`.
    FailAfter {
        deltas: Vec<OutputDelta>,
        error: EngineError,
    },
}

impl MockReply {
    /// Non-final fragments followed by an empty final delta.
    pub fn fragments<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deltas: Vec<OutputDelta> =
            parts.into_iter().map(|p| OutputDelta::fragment(p)).collect();
        deltas.push(OutputDelta::finished(""));
        MockReply::Deltas(deltas)
    }
}

/// A generation that reached an engine.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub engine_id: usize,
    pub request_id: Uuid,
    pub prompt: String,
    pub sampling: SamplingConfig,
}

#[derive(Default)]
struct Shared {
    script: Mutex<HashMap<String, VecDeque<MockReply>>>,
    create_failures: Mutex<VecDeque<EngineError>>,
    engines: Mutex<Vec<Weak<MockEngine>>>,
    generations: Mutex<Vec<GenerationRecord>>,
    aborted: Mutex<Vec<Uuid>>,
    specs: Mutex<Vec<ModelSpec>>,
    created: AtomicUsize,
    shutdowns: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Factory for [`MockEngine`]s sharing one script.
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    shared: Arc<Shared>,
    create_delay: Duration,
    delta_delay: Duration,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `create` take at least `delay`.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Sleep `delay` before each delta is produced.
    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = delay;
        self
    }

    /// Queue a reply for the next generation of `prompt`. Replies queued
    /// for the same prompt are consumed in order.
    pub fn script(&self, prompt: impl Into<String>, reply: MockReply) -> &Self {
        lock(&self.shared.script)
            .entry(prompt.into())
            .or_default()
            .push_back(reply);
        self
    }

    /// Make the next `create` fail with `error`.
    pub fn fail_next_create(&self, error: EngineError) -> &Self {
        lock(&self.shared.create_failures).push_back(error);
        self
    }

    /// Simulate every existing engine process disappearing. Later
    /// generations on those engines fail with a transport error.
    pub fn kill_engines(&self) {
        for engine in lock(&self.shared.engines).iter().filter_map(Weak::upgrade) {
            engine.killed.store(true, Ordering::Release);
        }
    }

    /// Number of engines successfully built.
    pub fn engines_created(&self) -> usize {
        self.shared.created.load(Ordering::Acquire)
    }

    /// Number of `shutdown` calls that stopped a live engine.
    pub fn shutdowns(&self) -> usize {
        self.shared.shutdowns.load(Ordering::Acquire)
    }

    /// Every generation that reached an engine, in arrival order.
    pub fn generations(&self) -> Vec<GenerationRecord> {
        lock(&self.shared.generations).clone()
    }

    /// Generations for one prompt.
    pub fn generations_for(&self, prompt: &str) -> Vec<GenerationRecord> {
        lock(&self.shared.generations)
            .iter()
            .filter(|g| g.prompt == prompt)
            .cloned()
            .collect()
    }

    /// Request ids passed to `abort`.
    pub fn aborted(&self) -> Vec<Uuid> {
        lock(&self.shared.aborted).clone()
    }

    /// Model specs passed to `create`, including failed attempts.
    pub fn specs(&self) -> Vec<ModelSpec> {
        lock(&self.shared.specs).clone()
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceEngine>> {
        lock(&self.shared.specs).push(spec.clone());
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if let Some(err) = lock(&self.shared.create_failures).pop_front() {
            return Err(err);
        }

        let id = self.shared.created.fetch_add(1, Ordering::AcqRel) + 1;
        let engine = Arc::new(MockEngine {
            id,
            shared: self.shared.clone(),
            delta_delay: self.delta_delay,
            stopped: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        });
        lock(&self.shared.engines).push(Arc::downgrade(&engine));
        tracing::debug!(engine_id = id, model = %spec.path, "mock engine created");
        Ok(engine)
    }
}

/// Engine built by [`MockEngineFactory`].
pub struct MockEngine {
    id: usize,
    shared: Arc<Shared>,
    delta_delay: Duration,
    stopped: AtomicBool,
    killed: AtomicBool,
}

impl MockEngine {
    /// 1-based creation order within its factory.
    pub fn id(&self) -> usize {
        self.id
    }

    fn next_reply(&self, prompt: &str) -> Option<MockReply> {
        lock(&self.shared.script)
            .get_mut(prompt)
            .and_then(|queue| queue.pop_front())
    }
}

/// One delta per whitespace-separated word, capped at `max_tokens`.
fn echo(request: &GenerationRequest) -> Vec<OutputDelta> {
    let limit = request.sampling.max_tokens() as usize;
    let mut deltas = Vec::new();
    let mut cumulative = String::new();
    for (i, word) in request.prompt.split_whitespace().take(limit).enumerate() {
        let piece = if i == 0 {
            word.to_string()
        } else {
            format!(" {word}")
        };
        cumulative.push_str(&piece);
        let text = if request.sampling.delta_mode() {
            piece
        } else {
            cumulative.clone()
        };
        deltas.push(OutputDelta::fragment(text));
    }
    deltas.push(OutputDelta::finished(""));
    deltas
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn generate(&self, request: &GenerationRequest) -> Result<DeltaStream> {
        lock(&self.shared.generations).push(GenerationRecord {
            engine_id: self.id,
            request_id: request.id,
            prompt: request.prompt.clone(),
            sampling: request.sampling.clone(),
        });

        if self.stopped.load(Ordering::Acquire) {
            return Err(EngineError::ShutDown);
        }
        if self.killed.load(Ordering::Acquire) {
            return Err(EngineError::Transport("engine process is gone".to_string()));
        }

        let (deltas, error) = match self.next_reply(&request.prompt) {
            Some(MockReply::RejectStart(err)) => return Err(err),
            Some(MockReply::Deltas(deltas)) => (deltas, None),
            Some(MockReply::FailAfter { deltas, error }) => (deltas, Some(error)),
            None => (echo(request), None),
        };

        let delay = self.delta_delay;
        let stream = async_stream::stream! {
            for delta in deltas {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(delta);
            }
            if let Some(err) = error {
                yield Err(err);
            }
        };
        Ok(stream.boxed())
    }

    fn abort(&self, request_id: Uuid) {
        lock(&self.shared.aborted).push(request_id);
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.shared.shutdowns.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(engine_id = self.id, "mock engine stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str, sampling: SamplingConfig) -> GenerationRequest {
        GenerationRequest::new(prompt, sampling)
    }

    #[test]
    fn echo_respects_max_tokens() {
        let deltas = echo(&request("one two three", SamplingConfig::warmup()));
        assert_eq!(
            deltas,
            vec![OutputDelta::fragment("one"), OutputDelta::finished("")]
        );
    }

    #[test]
    fn echo_cumulative_when_not_delta_mode() {
        let sampling = SamplingConfig::warmup()
            .params()
            .with_max_tokens(3)
            .validate()
            .unwrap();
        let deltas = echo(&request("a b c", sampling));
        let texts: Vec<&str> = deltas.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "a b", "a b c", ""]);
    }

    #[test]
    fn fragments_helper_appends_final() {
        match MockReply::fragments(["Hi", " there"]) {
            MockReply::Deltas(d) => {
                assert_eq!(d.len(), 3);
                assert!(d[2].is_final);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
