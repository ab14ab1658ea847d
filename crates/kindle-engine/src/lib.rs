//! # kindle-engine
//!
//! The boundary between kindle and the inference engine that actually
//! produces text. Defines the [`InferenceEngine`] and [`EngineFactory`] traits
//! and the values that cross them. Tokenization, batching, KV-cache management
//! and GPU scheduling all live on the other side of this boundary.
//!
//! ## Design Notes
//!
//! ### Streaming
//! [`InferenceEngine::generate`] resolves once the engine has accepted the
//! request and hands back a pull-based [`DeltaStream`]. Nothing is produced
//! ahead of the consumer; dropping the stream abandons the generation.
//!
//! ### Multiplexing
//! One engine instance serves many concurrent generations. Each
//! [`GenerationRequest`] carries a fresh id the engine uses to tell them apart,
//! so ids are never reused.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kindle_sampling::SamplingConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Opaque failure raised by an engine collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("engine transport failed: {0}")]
    Transport(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("engine has been shut down")]
    ShutDown,
}

/// Location of the model an engine is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Path (or served id) of the model weights.
    pub path: String,
}

impl ModelSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Last path segment, used as the human-facing model name.
    pub fn display_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }
}

/// One generation as submitted to the engine.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Unique per call, even for retries of the same prompt.
    pub id: Uuid,
    pub prompt: String,
    pub sampling: SamplingConfig,
}

impl GenerationRequest {
    /// Create a request with a random UUID.
    pub fn new(prompt: impl Into<String>, sampling: SamplingConfig) -> Self {
        Self::with_id(Uuid::new_v4(), prompt, sampling)
    }

    /// Create a request with an explicit ID (useful for testing/replay).
    pub fn with_id(id: Uuid, prompt: impl Into<String>, sampling: SamplingConfig) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            sampling,
        }
    }
}

/// A piece of engine output.
///
/// `text` may be empty, and the final delta may or may not carry text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDelta {
    pub text: String,
    pub is_final: bool,
}

impl OutputDelta {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn finished(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Output of a started generation, pulled one delta at a time.
pub type DeltaStream = BoxStream<'static, Result<OutputDelta>>;

/// A running inference engine.
///
/// Methods take `&self`; one instance is shared by every in-flight request.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Start a generation. Resolves once the engine accepted the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<DeltaStream>;

    /// Ask the engine to stop work for `request_id`. Engines that cannot
    /// cancel ignore this; dropping the [`DeltaStream`] still releases it.
    fn abort(&self, _request_id: Uuid) {}

    /// Stop accepting work and release engine resources.
    async fn shutdown(&self) -> Result<()>;
}

/// Builds engine instances bound to a model.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Construct and connect a new engine. May be slow.
    async fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceEngine>>;
}

impl fmt::Debug for dyn InferenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InferenceEngine")
    }
}
