//! # kindle-server
//!
//! Streams answers from a single, lazily started LLM engine over HTTP.
//!
//! The engine is built on first use and warmed up before it is declared
//! ready ([`lifecycle`]). Each request is validated, run against the engine
//! with one transparent retry on failure ([`orchestrator`]) and streamed to
//! the client as server-sent events ([`formatter`], [`streaming`]). Health
//! probes report readiness for orchestrators such as Kubernetes.

pub mod config;
pub mod error;
pub mod formatter;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod session_manager;
pub mod state;
pub mod streaming;

pub use config::{Backend, Cli};
pub use error::ServerError;
pub use formatter::{format_stream, StreamFormatter, WireEvent};
pub use lifecycle::{
    EngineHandle, EngineLifecycle, LifecyclePhase, LifecycleSettings, Readiness, ReadinessState,
};
pub use orchestrator::{EventStream, Orchestrator};
pub use server::{create_router, run_server, shutdown_signal};
pub use session_manager::{SessionGuard, SessionManager};
pub use state::{AppState, ServerConfig};
