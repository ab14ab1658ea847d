//! Client for an engine running as a separate OpenAI-compatible server
//! (for example a vLLM process).
//!
//! Building an engine connects to the server and checks that it serves the
//! configured model. Generations use `POST /v1/completions` with
//! `stream: true`; the event-stream body is decoded incrementally, so each
//! delta is read off the socket only when the consumer asks for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kindle_engine::{
    DeltaStream, EngineError, EngineFactory, GenerationRequest, InferenceEngine, ModelSpec,
    OutputDelta, Result,
};
use serde::{Deserialize, Serialize};

/// Header carrying the per-generation id to the server.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Builds [`RemoteEngine`]s talking to one server.
#[derive(Debug, Clone)]
pub struct RemoteEngineFactory {
    base_url: String,
    connect_timeout: Duration,
    probe_timeout: Duration,
    request_timeout: Duration,
}

impl RemoteEngineFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound the model listing request made while connecting.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Bound one whole generation, body included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[async_trait]
impl EngineFactory for RemoteEngineFactory {
    async fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceEngine>> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let url = format!("{}/v1/models", self.base_url);
        let response = client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let models: ModelList = response
            .json()
            .await
            .map_err(|e| EngineError::ModelLoad(format!("unreadable model list: {e}")))?;

        let served = models
            .data
            .iter()
            .find(|m| m.id == spec.path || m.id == spec.display_name())
            .map(|m| m.id.clone())
            .ok_or_else(|| {
                let available: Vec<&str> = models.data.iter().map(|m| m.id.as_str()).collect();
                EngineError::ModelLoad(format!(
                    "{} is not served by {} (available: {})",
                    spec.path,
                    self.base_url,
                    available.join(", ")
                ))
            })?;

        tracing::info!(base_url = %self.base_url, model = %served, "connected to remote engine");
        Ok(Arc::new(RemoteEngine {
            client,
            base_url: self.base_url.clone(),
            model: served,
            request_timeout: self.request_timeout,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Engine reached over HTTP.
pub struct RemoteEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl RemoteEngine {
    /// Model id as served by the remote server.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    /// -1 disables top-k on the server.
    top_k: i64,
    repetition_penalty: f32,
    stream: bool,
}

impl<'a> CompletionRequest<'a> {
    fn new(model: &'a str, request: &'a GenerationRequest) -> Self {
        let sampling = &request.sampling;
        Self {
            model,
            prompt: &request.prompt,
            max_tokens: sampling.max_tokens(),
            temperature: sampling.temperature(),
            top_p: sampling.top_p(),
            top_k: match sampling.top_k() {
                0 => -1,
                k => i64::from(k),
            },
            repetition_penalty: sampling.repetition_penalty(),
            stream: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    text: String,
    finish_reason: Option<String>,
}

/// Decode one `data:` payload. Chunks without choices (usage reports)
/// yield `None`.
fn decode_frame(payload: &str) -> Result<Option<OutputDelta>> {
    let chunk: CompletionChunk = serde_json::from_str(payload)
        .map_err(|e| EngineError::Inference(format!("malformed stream frame: {e}")))?;
    Ok(chunk.choices.into_iter().next().map(|choice| OutputDelta {
        text: choice.text,
        is_final: choice.finish_reason.is_some(),
    }))
}

/// Incremental splitter for `text/event-stream` bodies.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence;
/// only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the `data` payloads of completed lines.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        payloads
    }
}

#[async_trait]
impl InferenceEngine for RemoteEngine {
    async fn generate(&self, request: &GenerationRequest) -> Result<DeltaStream> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::ShutDown);
        }

        let url = format!("{}/v1/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(REQUEST_ID_HEADER, request.id.to_string())
            .timeout(self.request_timeout)
            .json(&CompletionRequest::new(&self.model, request))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("{status}: {body}");
            return Err(if status.is_server_error() {
                EngineError::Transport(msg)
            } else {
                EngineError::Inference(msg)
            });
        }

        let delta_mode = request.sampling.delta_mode();
        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut cumulative = String::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(EngineError::Transport(e.to_string()));
                        return;
                    }
                };
                for payload in decoder.push(&chunk) {
                    if payload == "[DONE]" {
                        return;
                    }
                    match decode_frame(&payload) {
                        Ok(Some(mut delta)) => {
                            if !delta_mode {
                                cumulative.push_str(&delta.text);
                                delta.text = cumulative.clone();
                            }
                            let last = delta.is_final;
                            yield Ok(delta);
                            if last {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(base_url = %self.base_url, model = %self.model, "remote engine released");
        }
        Ok(())
    }
}
