//! Application state and configuration.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::lifecycle::EngineLifecycle;
use crate::orchestrator::Orchestrator;
use crate::session_manager::SessionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runs generations against the shared engine.
    pub orchestrator: Orchestrator,
    /// Session lifecycle manager (concurrency + cancellation).
    pub sessions: Arc<SessionManager>,
    /// Server configuration.
    pub config: ServerConfig,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig, orchestrator: Orchestrator, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            sessions: SessionManager::new(max_concurrent),
            config,
            started_at: Utc::now(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<EngineLifecycle> {
        self.orchestrator.lifecycle()
    }
}

/// Identifiers reported by the HTTP surface.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Application name reported at `/`.
    pub app_name: String,
    /// Engine service name reported by `/health`.
    pub service_name: String,
    /// Model name reported by `/health`.
    pub model_name: String,
    /// Allow cross-origin requests from anywhere.
    pub permissive_cors: bool,
}
