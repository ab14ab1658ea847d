//! # kindle-runtime
//!
//! Concrete engine collaborators for kindle plus telemetry hooks:
//! - [`mock`]: scripted in-process engine for development and tests
//! - [`remote`]: client for an OpenAI-compatible engine server (e.g. vLLM)
//! - [`telemetry`]: time-to-first-fragment and throughput per generation

pub mod mock;
pub mod remote;
pub mod telemetry;

pub use mock::{GenerationRecord, MockEngine, MockEngineFactory, MockReply};
pub use remote::{RemoteEngine, RemoteEngineFactory, SseDecoder};
pub use telemetry::{
    GenerationMetrics, GenerationOutcome, GenerationTimer, LogTelemetry, NoopTelemetry,
    TelemetryHook, TracingTelemetry,
};
