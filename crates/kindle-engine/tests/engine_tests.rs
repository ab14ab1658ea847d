//! Integration tests for kindle-engine boundary traits and types.
//!
//! Validates:
//! - InferenceEngine / EngineFactory can be implemented by simple backends
//! - Error types display correctly and carry context
//! - Core types satisfy required trait bounds (Send, Sync, Clone, etc.)
//! - Trait objects work for dynamic dispatch

use futures::stream::{self, StreamExt};
use kindle_engine::*;
use kindle_sampling::SamplingConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Test Backends
// ---------------------------------------------------------------------------

/// Splits the prompt on whitespace and replays the words as deltas.
#[derive(Default)]
struct EchoEngine {
    stopped: AtomicBool,
}

#[async_trait::async_trait]
impl InferenceEngine for EchoEngine {
    async fn generate(&self, request: &GenerationRequest) -> Result<DeltaStream> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(EngineError::ShutDown);
        }
        let mut deltas: Vec<Result<OutputDelta>> = request
            .prompt
            .split_whitespace()
            .map(|w| Ok(OutputDelta::fragment(w)))
            .collect();
        deltas.push(Ok(OutputDelta::finished("")));
        Ok(stream::iter(deltas).boxed())
    }

    async fn shutdown(&self) -> Result<()> {
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }
}

/// A failing backend that rejects every request.
struct FailingEngine;

#[async_trait::async_trait]
impl InferenceEngine for FailingEngine {
    async fn generate(&self, _request: &GenerationRequest) -> Result<DeltaStream> {
        Err(EngineError::Transport("connection refused".to_string()))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

struct EchoFactory;

#[async_trait::async_trait]
impl EngineFactory for EchoFactory {
    async fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceEngine>> {
        if spec.path.is_empty() {
            return Err(EngineError::ModelLoad("empty path".to_string()));
        }
        Ok(Arc::new(EchoEngine::default()))
    }
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt, SamplingConfig::conversation())
}

// ---------------------------------------------------------------------------
// Trait Implementation Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn echo_engine_streams_words_then_final() {
    let engine = EchoEngine::default();
    let deltas: Vec<OutputDelta> = engine
        .generate(&request("hello world"))
        .await
        .unwrap()
        .map(|d| d.unwrap())
        .collect()
        .await;
    assert_eq!(
        deltas,
        vec![
            OutputDelta::fragment("hello"),
            OutputDelta::fragment("world"),
            OutputDelta::finished(""),
        ]
    );
}

#[tokio::test]
async fn generate_after_shutdown_fails() {
    let engine = EchoEngine::default();
    engine.shutdown().await.unwrap();
    let err = engine.generate(&request("hi")).await.err().unwrap();
    assert_eq!(err, EngineError::ShutDown);
}

#[tokio::test]
async fn failing_engine_reports_transport_error() {
    let engine = FailingEngine;
    let err = engine.generate(&request("hi")).await.err().unwrap();
    assert!(matches!(err, EngineError::Transport(_)));
}

#[tokio::test]
async fn default_abort_is_a_no_op() {
    let engine = EchoEngine::default();
    engine.abort(uuid::Uuid::new_v4());
    assert!(engine.generate(&request("still works")).await.is_ok());
}

// ---------------------------------------------------------------------------
// Factory / dynamic dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn factory_builds_trait_objects() {
    let factory: Arc<dyn EngineFactory> = Arc::new(EchoFactory);
    let engine = factory.create(&ModelSpec::new("/models/tiny")).await.unwrap();
    let first = engine
        .generate(&request("a b"))
        .await
        .unwrap()
        .next()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.text, "a");
}

#[tokio::test]
async fn factory_rejects_empty_model_path() {
    let err = EchoFactory.create(&ModelSpec::new("")).await.err().unwrap();
    assert!(matches!(err, EngineError::ModelLoad(_)));
}

#[test]
fn engines_can_coexist_behind_one_trait() {
    let engines: Vec<Arc<dyn InferenceEngine>> =
        vec![Arc::new(EchoEngine::default()), Arc::new(FailingEngine)];
    assert_eq!(engines.len(), 2);
    assert_eq!(format!("{:?}", engines[0]), "InferenceEngine");
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[test]
fn request_ids_are_unique() {
    let a = request("same prompt");
    let b = request("same prompt");
    assert_ne!(a.id, b.id);
}

#[test]
fn request_with_explicit_id() {
    let id = uuid::Uuid::new_v4();
    let req = GenerationRequest::with_id(id, "replay", SamplingConfig::warmup());
    assert_eq!(req.id, id);
    assert_eq!(req.sampling.max_tokens(), 1);
}

#[test]
fn model_spec_display_name_is_last_segment() {
    let spec = ModelSpec::new("/models_dir/language_model/GRPO-Vi-Qwen2-7B-RAG-W4A16");
    assert_eq!(spec.display_name(), "GRPO-Vi-Qwen2-7B-RAG-W4A16");
    assert_eq!(ModelSpec::new("plain").display_name(), "plain");
    assert_eq!(ModelSpec::new("/trailing/slash/").display_name(), "slash");
}

#[test]
fn error_display_carries_context() {
    let err = EngineError::ModelLoad("no such file".to_string());
    assert_eq!(err.to_string(), "model loading failed: no such file");
    assert_eq!(EngineError::ShutDown.to_string(), "engine has been shut down");
}

#[test]
fn output_delta_serde_shape() {
    let json = serde_json::to_value(OutputDelta::fragment("Hi")).unwrap();
    assert_eq!(json, serde_json::json!({"text": "Hi", "is_final": false}));
}

#[test]
fn types_are_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<GenerationRequest>();
    assert_send_sync::<OutputDelta>();
    assert_send_sync::<EngineError>();
    assert_send_sync::<Arc<dyn InferenceEngine>>();
}
